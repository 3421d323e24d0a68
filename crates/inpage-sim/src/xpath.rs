//! XPath subset over [`SimElement`] trees.
//!
//! Location paths made of child (`/`) and descendant (`//`) steps with a
//! name test (`name` or `*`) and predicates:
//!
//! - `[@attr]`, `[@attr='value']`
//! - `[text()='value']`, `[.='value']`
//! - `[contains(@attr, 'value')]`, `[contains(text(), 'value')]`, `[contains(., 'value')]`
//! - predicates joined with `and`
//!
//! A path starting with `/` is absolute even when evaluated against an
//! element, as in `document.evaluate`. Use `./` or `.//` for relative paths.

use std::sync::Arc;

use thiserror::Error;

use crate::dom::SimElement;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid XPath {xpath:?}: {reason}")]
pub struct XPathError {
    pub xpath: String,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    Child,
    Descendant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Operand {
    Attribute(String),
    /// `text()`: the element's own text
    Text,
    /// `.`: the full string value
    StringValue,
}

impl Operand {
    fn value(&self, element: &SimElement) -> Option<String> {
        match self {
            Operand::Attribute(name) => element.get_attribute(name),
            Operand::Text => Some(element.own_text()),
            Operand::StringValue => Some(element.text()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Condition {
    Exists(Operand),
    Equals(Operand, String),
    Contains(Operand, String),
}

impl Condition {
    fn holds(&self, element: &SimElement) -> bool {
        match self {
            Condition::Exists(Operand::Attribute(name)) => element.has_attribute(name),
            Condition::Exists(operand) => operand
                .value(element)
                .is_some_and(|value| !value.is_empty()),
            Condition::Equals(operand, expected) => {
                operand.value(element).as_ref() == Some(expected)
            }
            Condition::Contains(operand, needle) => operand
                .value(element)
                .is_some_and(|value| value.contains(needle.as_str())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Step {
    axis: Axis,
    /// `None` for `*`
    name: Option<String>,
    /// Each predicate is a conjunction of conditions.
    predicates: Vec<Vec<Condition>>,
}

impl Step {
    fn accepts(&self, element: &SimElement) -> bool {
        if self.name.as_deref().is_some_and(|name| name != element.tag()) {
            return false;
        }
        self
                .predicates
                .iter()
                .all(|conditions| conditions.iter().all(|c| c.holds(element)))
    }

    fn select_from(&self, node: &SimElement) -> Vec<Arc<SimElement>> {
        let candidates = match self.axis {
            Axis::Child => node.children(),
            Axis::Descendant => node.descendants(),
        };
        candidates.into_iter().filter(|el| self.accepts(el)).collect()
    }
}

/// A parsed location path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XPath {
    absolute: bool,
    steps: Vec<Step>,
}

impl XPath {
    pub fn parse(input: &str) -> Result<Self, XPathError> {
        Parser::new(input).parse_path()
    }

    /// Matching elements, in document order for single-axis paths.
    pub fn evaluate(&self, document: &SimElement, context: &SimElement) -> Vec<Arc<SimElement>> {
        let start = if self.absolute { document } else { context };
        let Some((first, rest)) = self.steps.split_first() else {
            return vec![];
        };

        let mut current = first.select_from(start);
        for step in rest {
            let mut next: Vec<Arc<SimElement>> = Vec::new();
            for node in &current {
                for found in step.select_from(node) {
                    if !next.iter().any(|seen| Arc::ptr_eq(seen, &found)) {
                        next.push(found);
                    }
                }
            }
            current = next;
        }
        current
    }
}

struct Parser<'a> {
    source: &'a str,
    chars: Vec<char>,
    pos: usize,
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || c == '-' || c == '_'
}

impl<'a> Parser<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.trim().chars().collect(),
            pos: 0,
        }
    }

    fn error(&self, reason: impl Into<String>) -> XPathError {
        XPathError {
            xpath: self.source.to_string(),
            reason: reason.into(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn eat(&mut self, token: &str) -> bool {
        let token: Vec<char> = token.chars().collect();
        if self.chars[self.pos..].starts_with(&token) {
            self.pos += token.len();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &str) -> Result<(), XPathError> {
        self.skip_whitespace();
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.error(format!("expected {token:?}")))
        }
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn parse_path(mut self) -> Result<XPath, XPathError> {
        let (absolute, mut axis) = if self.eat(".//") {
            (false, Axis::Descendant)
        } else if self.eat("./") {
            (false, Axis::Child)
        } else if self.eat("//") {
            (true, Axis::Descendant)
        } else if self.eat("/") {
            (true, Axis::Child)
        } else {
            (false, Axis::Child)
        };

        let mut steps = Vec::new();
        loop {
            steps.push(self.parse_step(axis)?);
            if self.peek().is_none() {
                break;
            }
            axis = if self.eat("//") {
                Axis::Descendant
            } else if self.eat("/") {
                Axis::Child
            } else {
                return Err(self.error(format!("unexpected {:?}", self.chars[self.pos])));
            };
        }
        Ok(XPath { absolute, steps })
    }

    fn parse_step(&mut self, axis: Axis) -> Result<Step, XPathError> {
        let name = if self.eat("*") {
            None
        } else {
            Some(self.name()?.to_ascii_lowercase())
        };
        let mut predicates = Vec::new();
        while self.eat("[") {
            predicates.push(self.parse_predicate()?);
        }
        Ok(Step {
            axis,
            name,
            predicates,
        })
    }

    fn parse_predicate(&mut self) -> Result<Vec<Condition>, XPathError> {
        let mut conditions = vec![self.parse_condition()?];
        loop {
            self.skip_whitespace();
            if self.eat("]") {
                return Ok(conditions);
            }
            if self.eat("and") {
                conditions.push(self.parse_condition()?);
            } else {
                return Err(self.error("expected \"]\" or \"and\""));
            }
        }
    }

    fn parse_condition(&mut self) -> Result<Condition, XPathError> {
        self.skip_whitespace();
        if self.eat("contains(") {
            self.skip_whitespace();
            let operand = self.parse_operand()?;
            self.expect(",")?;
            self.skip_whitespace();
            let needle = self.literal()?;
            self.expect(")")?;
            return Ok(Condition::Contains(operand, needle));
        }

        let operand = self.parse_operand()?;
        self.skip_whitespace();
        if self.eat("=") {
            self.skip_whitespace();
            Ok(Condition::Equals(operand, self.literal()?))
        } else {
            Ok(Condition::Exists(operand))
        }
    }

    fn parse_operand(&mut self) -> Result<Operand, XPathError> {
        if self.eat("@") {
            Ok(Operand::Attribute(self.name()?))
        } else if self.eat("text()") {
            Ok(Operand::Text)
        } else if self.eat(".") {
            Ok(Operand::StringValue)
        } else {
            Err(self.error("expected @attribute, text() or ."))
        }
    }

    fn name(&mut self) -> Result<String, XPathError> {
        let start = self.pos;
        while self.peek().is_some_and(is_name_char) {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(self.error("expected a name"));
        }
        Ok(self.chars[start..self.pos].iter().collect())
    }

    fn literal(&mut self) -> Result<String, XPathError> {
        let quote = match self.peek() {
            Some(q @ ('"' | '\'')) => q,
            _ => return Err(self.error("expected a string literal")),
        };
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
        Err(self.error("unterminated string literal"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `#document > html > body > div.toolbar > (button[title=Save] "Save", button "Run")`
    fn tree() -> (Arc<SimElement>, Arc<SimElement>) {
        let document = SimElement::new("#document");
        let html = SimElement::new("html");
        let body = SimElement::new("body");
        let toolbar = SimElement::with_classes("div", &["jp-Toolbar", "jp-NotebookPanel-toolbar"]);
        let save = SimElement::new("button");
        save.set_attribute("title", "Save");
        save.set_text("Save");
        let run = SimElement::new("button");
        run.set_text("Run");
        toolbar.append_child(save);
        toolbar.append_child(run);
        body.append_child(toolbar.clone());
        html.append_child(body);
        document.append_child(html);
        (document, toolbar)
    }

    fn texts(found: &[Arc<SimElement>]) -> Vec<String> {
        found.iter().map(|el| el.text()).collect()
    }

    fn eval(xpath: &str, document: &SimElement, context: &SimElement) -> Vec<String> {
        texts(&XPath::parse(xpath).unwrap().evaluate(document, context))
    }

    #[test]
    fn test_absolute_child_path() {
        let (doc, _) = tree();
        assert_eq!(eval("/html/body/div/button", &doc, &doc), vec!["Save", "Run"]);
        assert!(eval("/body", &doc, &doc).is_empty());
    }

    #[test]
    fn test_descendant_path() {
        let (doc, _) = tree();
        assert_eq!(eval("//button", &doc, &doc), vec!["Save", "Run"]);
        assert_eq!(eval("//body//*", &doc, &doc).len(), 3);
    }

    #[test]
    fn test_predicates() {
        let (doc, _) = tree();
        assert_eq!(eval("//button[@title]", &doc, &doc), vec!["Save"]);
        assert_eq!(eval("//button[@title='Save']", &doc, &doc), vec!["Save"]);
        assert_eq!(eval("//button[text()=\"Run\"]", &doc, &doc), vec!["Run"]);
        assert_eq!(eval("//div[contains(., 'Run')]", &doc, &doc), vec!["SaveRun"]);
        assert_eq!(
            eval("//div[contains(@class, 'jp-Toolbar')]/button[.='Run']", &doc, &doc),
            vec!["Run"]
        );
        assert_eq!(
            eval("//button[@title and contains(text(), 'Sa')]", &doc, &doc),
            vec!["Save"]
        );
        assert!(eval("//button[@title='Run']", &doc, &doc).is_empty());
    }

    #[test]
    fn test_relative_paths_use_context() {
        let (doc, toolbar) = tree();
        assert_eq!(eval("./button", &doc, &toolbar), vec!["Save", "Run"]);
        assert_eq!(eval("button[@title]", &doc, &toolbar), vec!["Save"]);
        assert_eq!(eval(".//button", &doc, &toolbar).len(), 2);
        // absolute paths ignore the context node
        assert_eq!(eval("//html", &doc, &toolbar).len(), 1);
    }

    #[test]
    fn test_invalid_xpath() {
        for xpath in ["", "//", "//div[", "//div[@]", "//div[contains(@a 'b')]", "//a[text()='x]"] {
            assert!(XPath::parse(xpath).is_err(), "{xpath:?} should not parse");
        }
    }
}
