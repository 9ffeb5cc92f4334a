use divan::{Bencher, black_box};
use pagediff::{CompareOptions, Comparison, Document, RuleDeclaration, Snapshot, StyleSnapshot};

fn main() {
    divan::main();
}

/// A page of `sections` sections with a heading, a paragraph and a short list each.
fn page(sections: usize) -> String {
    let mut html = String::from("<!DOCTYPE html><html><head><title>bench</title></head><body>");
    for i in 0..sections {
        html.push_str(&format!(
            r#"<section id="s{i}" class="card  wide"><h2>Section {i}</h2><p>Lorem <a href="/p/{i}">ipsum</a> dolor</p><ul><li>one</li><li>two</li><li>three</li></ul></section>"#
        ));
    }
    html.push_str("</body></html>");
    html
}

/// Same page with a changed attribute, a removed element and a swap.
fn edited(sections: usize) -> String {
    page(sections)
        .replacen(r#"href="/p/1""#, r#"href="/p/one""#, 1)
        .replacen("<li>three</li>", "", 1)
        .replacen("<li>one</li><li>two</li>", "<li>two</li><li>one</li>", 1)
}

// Structural + visual pass without styles
#[divan::bench(args = [10, 100, 1000])]
fn structural(bencher: Bencher, sections: usize) {
    let a = page(sections);
    let b = edited(sections);
    bencher.bench_local(|| {
        let outcome = Comparison::from_html(black_box(&a), black_box(&b), CompareOptions::default())
            .unwrap()
            .run_to_completion()
            .unwrap();
        black_box(outcome);
    });
}

fn styled(items: usize, color: &str) -> Snapshot {
    let mut doc = Document::new("body");
    let mut styles = StyleSnapshot::new();
    for i in 0..items {
        let id = format!("i{i}");
        let div = doc.append_element(doc.root, "div", [("class", "item"), ("id", id.as_str())]);
        doc.append_text(div, "text");
        styles.set_computed(div, [("color", color), ("padding-top", "1px")]);
        styles.add_rule(div, RuleDeclaration::new(".item", "site.css", [("color", color)]));
    }
    let root = doc.root;
    Snapshot::new(doc, root).with_styles(styles)
}

// Visual pass over style snapshots, every pair differing
#[divan::bench(args = [100, 1000])]
fn visual(bencher: Bencher, items: usize) {
    bencher
        .with_inputs(|| (styled(items, "red"), styled(items, "blue")))
        .bench_local_values(|(a, b)| {
            let options = CompareOptions {
                max_differences: usize::MAX,
                ..Default::default()
            };
            let outcome = Comparison::new(a, b, options)
                .unwrap()
                .run_to_completion()
                .unwrap();
            black_box(outcome);
        });
}
