//! CSS selector subset.
//!
//! Supported: type selectors, `*`, `#id`, `.class`, `[attr]`,
//! `[attr=value]` (quoted or bare), descendant and child (`>`)
//! combinators, and comma-separated selector lists.

use thiserror::Error;

use crate::dom::SimElement;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid selector {selector:?}: {reason}")]
pub struct SelectorError {
    pub selector: String,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combinator {
    Descendant,
    Child,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct AttrMatch {
    name: String,
    value: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Compound {
    tag: Option<String>,
    ids: Vec<String>,
    classes: Vec<String>,
    attributes: Vec<AttrMatch>,
}

impl Compound {
    fn matches(&self, element: &SimElement) -> bool {
        if self.tag.as_deref().is_some_and(|tag| tag != element.tag()) {
            return false;
        }
        let id = element.id();
        self.ids.iter().all(|want| id.as_deref() == Some(want.as_str()))
            && self.classes.iter().all(|class| element.has_class(class))
            && self.attributes.iter().all(|attr| match &attr.value {
                Some(value) => element.get_attribute(&attr.name).as_ref() == Some(value),
                None => element.has_attribute(&attr.name),
            })
    }
}

/// One complex selector. `parts[i].0` joins `parts[i - 1]` to `parts[i]`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Complex {
    parts: Vec<(Combinator, Compound)>,
}

impl Complex {
    fn matches(&self, element: &SimElement) -> bool {
        match self.parts.len() {
            0 => false,
            n => matches_from(element, &self.parts, n - 1),
        }
    }
}

fn matches_from(element: &SimElement, parts: &[(Combinator, Compound)], i: usize) -> bool {
    let (combinator, compound) = &parts[i];
    if !compound.matches(element) {
        return false;
    }
    if i == 0 {
        return true;
    }
    match combinator {
        Combinator::Child => element
            .parent()
            .is_some_and(|parent| matches_from(&parent, parts, i - 1)),
        Combinator::Descendant => {
            let mut ancestor = element.parent();
            while let Some(current) = ancestor {
                if matches_from(&current, parts, i - 1) {
                    return true;
                }
                ancestor = current.parent();
            }
            false
        }
    }
}

/// A parsed, comma-separated selector list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectorList {
    selectors: Vec<Complex>,
}

impl SelectorList {
    pub fn parse(input: &str) -> Result<Self, SelectorError> {
        Parser::new(input).parse_list()
    }

    pub fn matches(&self, element: &SimElement) -> bool {
        self.selectors.iter().any(|s| s.matches(element))
    }
}

struct Parser<'a> {
    source: &'a str,
    chars: Vec<char>,
    pos: usize,
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '-' || c == '_'
}

impl<'a> Parser<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.chars().collect(),
            pos: 0,
        }
    }

    fn error(&self, reason: impl Into<String>) -> SelectorError {
        SelectorError {
            selector: self.source.to_string(),
            reason: reason.into(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) -> bool {
        let start = self.pos;
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
        self.pos > start
    }

    fn parse_list(mut self) -> Result<SelectorList, SelectorError> {
        let mut selectors = Vec::new();
        loop {
            self.skip_whitespace();
            selectors.push(self.parse_complex()?);
            self.skip_whitespace();
            match self.peek() {
                None => break,
                Some(',') => self.pos += 1,
                Some(c) => return Err(self.error(format!("unexpected {c:?}"))),
            }
        }
        Ok(SelectorList { selectors })
    }

    fn parse_complex(&mut self) -> Result<Complex, SelectorError> {
        let mut parts = vec![(Combinator::Descendant, self.parse_compound()?)];
        loop {
            let had_space = self.skip_whitespace();
            match self.peek() {
                None | Some(',') => break,
                Some('>') => {
                    self.pos += 1;
                    self.skip_whitespace();
                    parts.push((Combinator::Child, self.parse_compound()?));
                }
                Some(_) if had_space => {
                    parts.push((Combinator::Descendant, self.parse_compound()?));
                }
                Some(c) => return Err(self.error(format!("unexpected {c:?}"))),
            }
        }
        Ok(Complex { parts })
    }

    fn parse_compound(&mut self) -> Result<Compound, SelectorError> {
        let mut compound = Compound::default();
        let mut empty = true;

        match self.peek() {
            Some('*') => {
                self.pos += 1;
                empty = false;
            }
            Some(c) if is_ident_char(c) => {
                compound.tag = Some(self.ident()?.to_ascii_lowercase());
                empty = false;
            }
            _ => {}
        }

        loop {
            match self.peek() {
                Some('#') => {
                    self.pos += 1;
                    compound.ids.push(self.ident()?);
                }
                Some('.') => {
                    self.pos += 1;
                    compound.classes.push(self.ident()?);
                }
                Some('[') => {
                    self.pos += 1;
                    compound.attributes.push(self.attribute()?);
                }
                _ => break,
            }
            empty = false;
        }

        if empty {
            return Err(self.error("expected a selector"));
        }
        Ok(compound)
    }

    fn ident(&mut self) -> Result<String, SelectorError> {
        let start = self.pos;
        while self.peek().is_some_and(is_ident_char) {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(self.error("expected an identifier"));
        }
        Ok(self.chars[start..self.pos].iter().collect())
    }

    fn attribute(&mut self) -> Result<AttrMatch, SelectorError> {
        self.skip_whitespace();
        let name = self.ident()?;
        self.skip_whitespace();
        let value = if self.peek() == Some('=') {
            self.pos += 1;
            self.skip_whitespace();
            let value = match self.peek() {
                Some(quote @ ('"' | '\'')) => self.quoted(quote)?,
                _ => self.ident()?,
            };
            self.skip_whitespace();
            Some(value)
        } else {
            None
        };
        if self.peek() != Some(']') {
            return Err(self.error("unterminated attribute selector"));
        }
        self.pos += 1;
        Ok(AttrMatch { name, value })
    }

    fn quoted(&mut self, quote: char) -> Result<String, SelectorError> {
        self.pos += 1;
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c == quote {
                let value = self.chars[start..self.pos].iter().collect();
                self.pos += 1;
                return Ok(value);
            }
            self.pos += 1;
        }
        Err(self.error("unterminated string"))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    /// `div.jp-Notebook > div#c1.jp-Cell[data-type=code] > span`
    fn tree() -> (Arc<SimElement>, Arc<SimElement>, Arc<SimElement>) {
        let notebook = SimElement::with_classes("div", &["jp-Notebook"]);
        let cell = SimElement::with_classes("div", &["jp-Cell", "jp-mod-active"]);
        cell.set_attribute("id", "c1");
        cell.set_attribute("data-type", "code");
        let span = SimElement::new("span");
        cell.append_child(span.clone());
        notebook.append_child(cell.clone());
        (notebook, cell, span)
    }

    fn matches(selector: &str, element: &SimElement) -> bool {
        SelectorList::parse(selector).unwrap().matches(element)
    }

    #[test]
    fn test_simple_selectors() {
        let (_notebook, cell, span) = tree();
        assert!(matches("div", &cell));
        assert!(matches("DIV", &cell));
        assert!(matches("*", &span));
        assert!(matches("#c1", &cell));
        assert!(matches(".jp-Cell.jp-mod-active", &cell));
        assert!(!matches(".jp-Cell.jp-mod-selected", &cell));
        assert!(matches("div#c1.jp-Cell", &cell));
        assert!(!matches("span#c1", &cell));
    }

    #[test]
    fn test_attribute_selectors() {
        let (_notebook, cell, _span) = tree();
        assert!(matches("[data-type]", &cell));
        assert!(matches("[data-type=code]", &cell));
        assert!(matches("[data-type=\"code\"]", &cell));
        assert!(matches("[ data-type = 'code' ]", &cell));
        assert!(!matches("[data-type=markdown]", &cell));
        assert!(!matches("[data-missing]", &cell));
    }

    #[test]
    fn test_combinators() {
        // parents are weak: the ancestors must outlive the walk
        let (_notebook, _cell, span) = tree();
        assert!(matches(".jp-Notebook span", &span));
        assert!(matches(".jp-Notebook > .jp-Cell > span", &span));
        assert!(matches(".jp-Cell>span", &span));
        assert!(!matches(".jp-Notebook > span", &span));
        assert!(!matches(".jp-Other span", &span));
    }

    #[test]
    fn test_selector_list() {
        let (notebook, cell, _) = tree();
        assert!(matches(".nope, .jp-Cell", &cell));
        assert!(matches(".jp-Cell , .jp-Notebook", &notebook));
    }

    #[test]
    fn test_invalid_selectors() {
        for selector in ["", "div[", ".", "div >", "[a=\"b]", "a,,b", "div)"] {
            assert!(
                SelectorList::parse(selector).is_err(),
                "{selector:?} should not parse"
            );
        }
    }
}
