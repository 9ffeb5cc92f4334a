//! CSS selector specificity.
//!
//! The engine only needs a comparable value per selector; anything implementing
//! [`SpecificityCalculator`] can stand in for the built-in [`SelectorSpecificity`].

use facet::Facet;

/// `(ids, classes, types)`, compared lexicographically.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Facet)]
pub struct Specificity {
    pub ids: u32,
    pub classes: u32,
    pub types: u32,
}

impl Specificity {
    pub const fn new(ids: u32, classes: u32, types: u32) -> Self {
        Specificity {
            ids,
            classes,
            types,
        }
    }

    fn add(self, other: Specificity) -> Self {
        Specificity {
            ids: self.ids + other.ids,
            classes: self.classes + other.classes,
            types: self.types + other.types,
        }
    }
}

impl std::fmt::Display for Specificity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{},{},{}", self.ids, self.classes, self.types)
    }
}

/// Computes the specificity of selector text.
pub trait SpecificityCalculator {
    fn specificity(&self, selector: &str) -> Specificity;
}

impl<F> SpecificityCalculator for F
where
    F: Fn(&str) -> Specificity,
{
    fn specificity(&self, selector: &str) -> Specificity {
        self(selector)
    }
}

/// Selectors Level 3 counting. For a selector list, the highest specificity wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct SelectorSpecificity;

impl SpecificityCalculator for SelectorSpecificity {
    fn specificity(&self, selector: &str) -> Specificity {
        of_list(selector)
    }
}

/// Pseudo-elements that may be written with a single colon.
const LEGACY_PSEUDO_ELEMENTS: &[&str] = &["before", "after", "first-line", "first-letter"];

fn of_list(selectors: &str) -> Specificity {
    split_top_level(selectors)
        .into_iter()
        .filter(|s| !s.trim().is_empty())
        .map(of_selector)
        .max()
        .unwrap_or_default()
}

/// Split on commas outside of parentheses, brackets and quotes.
fn split_top_level(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;

    for (i, c) in s.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '(' | '[') => depth += 1,
            (None, ')' | ']') => depth = depth.saturating_sub(1),
            (None, ',') if depth == 0 => {
                parts.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '-' || c == '_' || !c.is_ascii()
}

fn skip_ident(chars: &[char], mut i: usize) -> usize {
    while i < chars.len() {
        if chars[i] == '\\' {
            i += 2;
        } else if is_ident_char(chars[i]) {
            i += 1;
        } else {
            break;
        }
    }
    i.min(chars.len())
}

/// Index of the `close` matching the opener just before `i`, or the end.
fn skip_group(chars: &[char], mut i: usize, open: char, close: char) -> usize {
    let mut depth = 1usize;
    while i < chars.len() {
        if chars[i] == open {
            depth += 1;
        } else if chars[i] == close {
            depth -= 1;
            if depth == 0 {
                return i;
            }
        }
        i += 1;
    }
    chars.len()
}

fn of_selector(selector: &str) -> Specificity {
    let chars: Vec<char> = selector.chars().collect();
    let mut spec = Specificity::default();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '#' => {
                spec.ids += 1;
                i = skip_ident(&chars, i + 1);
            }
            '.' => {
                spec.classes += 1;
                i = skip_ident(&chars, i + 1);
            }
            '[' => {
                spec.classes += 1;
                i = skip_group(&chars, i + 1, '[', ']') + 1;
            }
            ':' => {
                let element = chars.get(i + 1) == Some(&':');
                let start = if element { i + 2 } else { i + 1 };
                let end = skip_ident(&chars, start);
                let name: String = chars[start..end].iter().collect::<String>().to_ascii_lowercase();
                i = end;

                let mut argument = None;
                if chars.get(i) == Some(&'(') {
                    let close = skip_group(&chars, i + 1, '(', ')');
                    argument = Some(chars[i + 1..close].iter().collect::<String>());
                    i = close + 1;
                }

                if element || LEGACY_PSEUDO_ELEMENTS.contains(&name.as_str()) {
                    spec.types += 1;
                } else if name == "not" {
                    // Negation counts its argument, not itself
                    if let Some(argument) = argument {
                        spec = spec.add(of_list(&argument));
                    }
                } else {
                    spec.classes += 1;
                }
            }
            c if is_ident_char(c) && !c.is_ascii_digit() => {
                spec.types += 1;
                i = skip_ident(&chars, i);
            }
            _ => i += 1,
        }
    }

    spec
}
