//! A small in-memory DOM.
//!
//! Elements form a tree with strong child links and weak parent links.
//! Layout is not computed: each element carries the box and client rect
//! count that the notebook view assigns to it.

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, Weak};

use inpage::host::{Dom, DomElement, ElementRef, Rect};
use inpage::HostError;
use log::warn;

use crate::selector::{SelectorError, SelectorList};
use crate::xpath::{XPath, XPathError};

#[derive(Default)]
struct ElementState {
    attributes: BTreeMap<String, String>,
    text: String,
    rect: Rect,
    client_rects: usize,
    children: Vec<Arc<SimElement>>,
}

pub struct SimElement {
    tag: String,
    parent: RwLock<Weak<SimElement>>,
    state: RwLock<ElementState>,
}

impl SimElement {
    pub fn new(tag: &str) -> Arc<Self> {
        Arc::new(Self {
            tag: tag.to_ascii_lowercase(),
            parent: RwLock::new(Weak::new()),
            state: RwLock::new(ElementState::default()),
        })
    }

    /// Element with the given classes and a visible default box.
    pub fn with_classes(tag: &str, classes: &[&str]) -> Arc<Self> {
        let element = Self::new(tag);
        if !classes.is_empty() {
            element.set_attribute("class", &classes.join(" "));
        }
        element.set_rect(Rect {
            x: 0.0,
            y: 0.0,
            width: 800.0,
            height: 20.0,
        });
        element
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, ElementState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, ElementState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn id(&self) -> Option<String> {
        self.get_attribute("id")
    }

    pub fn get_attribute(&self, name: &str) -> Option<String> {
        self.read().attributes.get(name).cloned()
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.read().attributes.contains_key(name)
    }

    pub fn set_attribute(&self, name: &str, value: &str) {
        self.write()
            .attributes
            .insert(name.to_string(), value.to_string());
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.read()
            .attributes
            .get("class")
            .is_some_and(|classes| classes.split_whitespace().any(|c| c == class))
    }

    pub fn add_class(&self, class: &str) {
        if self.has_class(class) {
            return;
        }
        let mut state = self.write();
        let classes = state.attributes.entry("class".to_string()).or_default();
        if !classes.is_empty() {
            classes.push(' ');
        }
        classes.push_str(class);
    }

    pub fn remove_class(&self, class: &str) {
        let mut state = self.write();
        if let Some(classes) = state.attributes.get_mut("class") {
            *classes = classes
                .split_whitespace()
                .filter(|c| *c != class)
                .collect::<Vec<_>>()
                .join(" ");
        }
    }

    pub fn toggle_class(&self, class: &str, on: bool) {
        if on {
            self.add_class(class);
        } else {
            self.remove_class(class);
        }
    }

    /// Own text, without descendants.
    pub fn own_text(&self) -> String {
        self.read().text.clone()
    }

    pub fn set_text(&self, text: &str) {
        self.write().text = text.to_string();
    }

    pub fn rect(&self) -> Rect {
        self.read().rect
    }

    pub fn set_rect(&self, rect: Rect) {
        let mut state = self.write();
        state.rect = rect;
        state.client_rects = usize::from(rect.width > 0.0 || rect.height > 0.0);
    }

    pub fn set_client_rects(&self, count: usize) {
        self.write().client_rects = count;
    }

    /// Collapse the element as `display: none` would.
    pub fn hide(&self) {
        self.set_rect(Rect::default());
    }

    pub fn parent(&self) -> Option<Arc<SimElement>> {
        self.parent
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .upgrade()
    }

    pub fn children(&self) -> Vec<Arc<SimElement>> {
        self.read().children.clone()
    }

    pub fn append_child(self: &Arc<Self>, child: Arc<SimElement>) {
        *child.parent.write().unwrap_or_else(|e| e.into_inner()) = Arc::downgrade(self);
        self.write().children.push(child);
    }

    pub fn remove_child(&self, child: &Arc<SimElement>) {
        self.write().children.retain(|c| !Arc::ptr_eq(c, child));
        *child.parent.write().unwrap_or_else(|e| e.into_inner()) = Weak::new();
    }

    /// Replace all children, keeping the given order.
    pub fn set_children(self: &Arc<Self>, children: Vec<Arc<SimElement>>) {
        for child in &children {
            *child.parent.write().unwrap_or_else(|e| e.into_inner()) = Arc::downgrade(self);
        }
        self.write().children = children;
    }

    pub fn clear_children(&self) {
        let children = std::mem::take(&mut self.write().children);
        for child in children {
            *child.parent.write().unwrap_or_else(|e| e.into_inner()) = Weak::new();
        }
    }

    /// Descendants in document order, excluding `self`.
    pub fn descendants(&self) -> Vec<Arc<SimElement>> {
        let mut out = Vec::new();
        let mut stack: Vec<Arc<SimElement>> = self.children().into_iter().rev().collect();
        while let Some(element) = stack.pop() {
            stack.extend(element.children().into_iter().rev());
            out.push(element);
        }
        out
    }

    /// Concatenated text of the element and all descendants.
    pub fn text(&self) -> String {
        let mut text = self.own_text();
        for child in self.children() {
            text.push_str(&child.text());
        }
        text
    }
}

impl DomElement for SimElement {
    fn tag_name(&self) -> String {
        self.tag.to_ascii_uppercase()
    }

    fn text_content(&self) -> String {
        self.text()
    }

    fn attribute(&self, name: &str) -> Option<String> {
        self.get_attribute(name)
    }

    fn bounding_box(&self) -> Rect {
        self.rect()
    }

    fn client_rect_count(&self) -> usize {
        self.read().client_rects
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// The page: a document node holding `<html><body>`.
pub struct SimDom {
    document: Arc<SimElement>,
    body: Arc<SimElement>,
}

impl Default for SimDom {
    fn default() -> Self {
        Self::new()
    }
}

impl SimDom {
    pub fn new() -> Self {
        let document = SimElement::new("#document");
        let html = SimElement::with_classes("html", &[]);
        let body = SimElement::with_classes("body", &[]);
        html.append_child(body.clone());
        document.append_child(html);
        Self { document, body }
    }

    pub fn document(&self) -> &Arc<SimElement> {
        &self.document
    }

    pub fn body_element(&self) -> &Arc<SimElement> {
        &self.body
    }

    /// Every element under `root` (or the document) matching `selector`.
    pub fn query_selector_all(
        &self,
        root: Option<&SimElement>,
        selector: &str,
    ) -> Result<Vec<Arc<SimElement>>, SelectorError> {
        let list = SelectorList::parse(selector)?;
        Ok(root
            .unwrap_or(self.document.as_ref())
            .descendants()
            .into_iter()
            .filter(|el| list.matches(el))
            .collect())
    }

    pub fn evaluate_xpath(
        &self,
        root: Option<&SimElement>,
        xpath: &str,
    ) -> Result<Vec<Arc<SimElement>>, XPathError> {
        let path = XPath::parse(xpath)?;
        Ok(match root {
            Some(root) => path.evaluate(&self.document, root),
            None => path.evaluate(&self.document, &self.document),
        })
    }
}

fn as_sim(element: &ElementRef) -> Option<&SimElement> {
    element.as_any().downcast_ref::<SimElement>()
}

fn to_ref(element: Arc<SimElement>) -> ElementRef {
    element
}

fn invalid_query(query: &str, reason: String) -> HostError {
    warn!("[dom] Rejecting query {:?}: {}", query, reason);
    HostError::InvalidQuery {
        query: query.to_string(),
        reason,
    }
}

impl Dom for SimDom {
    fn body(&self) -> ElementRef {
        self.body.clone()
    }

    fn query_selector(
        &self,
        root: Option<&ElementRef>,
        selector: &str,
    ) -> Result<Option<ElementRef>, HostError> {
        // a root from another document holds nothing of ours
        let root = match root {
            Some(r) => match as_sim(r) {
                Some(r) => Some(r),
                None => return Ok(None),
            },
            None => None,
        };
        let matches = self
            .query_selector_all(root, selector)
            .map_err(|e| invalid_query(selector, e.reason))?;
        Ok(matches.into_iter().next().map(to_ref))
    }

    fn query_xpath(
        &self,
        root: Option<&ElementRef>,
        xpath: &str,
    ) -> Result<Option<ElementRef>, HostError> {
        let root = match root {
            Some(r) => match as_sim(r) {
                Some(r) => Some(r),
                None => return Ok(None),
            },
            None => None,
        };
        let matches = self
            .evaluate_xpath(root, xpath)
            .map_err(|e| invalid_query(xpath, e.reason))?;
        Ok(matches.into_iter().next().map(to_ref))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page() -> SimDom {
        let dom = SimDom::new();
        let panel = SimElement::with_classes("div", &["jp-NotebookPanel"]);
        let cell = SimElement::with_classes("div", &["jp-Cell", "jp-CodeCell"]);
        let output_area = SimElement::with_classes("div", &["jp-Cell-outputArea"]);
        let output = SimElement::with_classes("div", &["jp-OutputArea-output"]);
        output.set_text("42");
        output_area.append_child(output);
        cell.append_child(output_area);
        panel.append_child(cell);
        dom.body_element().append_child(panel);
        dom
    }

    #[test]
    fn test_classes() {
        let el = SimElement::new("div");
        el.add_class("a");
        el.add_class("b");
        el.add_class("a");
        assert_eq!(el.get_attribute("class").as_deref(), Some("a b"));
        el.remove_class("a");
        assert!(!el.has_class("a"));
        assert!(el.has_class("b"));
    }

    #[test]
    fn test_text_content_includes_descendants() {
        let parent = SimElement::new("p");
        parent.set_text("x = ");
        let child = SimElement::new("span");
        child.set_text("1");
        parent.append_child(child);
        assert_eq!(parent.text(), "x = 1");
    }

    #[test]
    fn test_parent_links() {
        let parent = SimElement::new("div");
        let child = SimElement::new("span");
        parent.append_child(child.clone());
        assert!(Arc::ptr_eq(&child.parent().unwrap(), &parent));

        parent.remove_child(&child);
        assert!(child.parent().is_none());
        assert!(parent.children().is_empty());
    }

    #[test]
    fn test_descendants_in_document_order() {
        let dom = page();
        let classes: Vec<String> = dom
            .document()
            .descendants()
            .iter()
            .filter_map(|el| el.get_attribute("class"))
            .collect();
        assert_eq!(
            classes,
            vec![
                "jp-NotebookPanel",
                "jp-Cell jp-CodeCell",
                "jp-Cell-outputArea",
                "jp-OutputArea-output"
            ]
        );
    }

    #[test]
    fn test_query_selector_from_root() {
        let dom = page();
        let cell = dom.query_selector(None, ".jp-CodeCell").unwrap().unwrap();
        let output = dom
            .query_selector(Some(&cell), inpage::OUTPUT_SELECTOR)
            .unwrap()
            .unwrap();
        assert_eq!(output.text_content(), "42");
        assert_eq!(output.tag_name(), "DIV");
    }

    #[test]
    fn test_invalid_query_is_an_error() {
        let dom = page();
        assert!(matches!(
            dom.query_selector(None, "div["),
            Err(HostError::InvalidQuery { query, .. }) if query == "div["
        ));
        assert!(dom.query_xpath(None, "//div[").is_err());
        assert!(dom.query_selector(None, ".missing").unwrap().is_none());
    }

    #[test]
    fn test_hidden_element_has_no_box() {
        let el = SimElement::with_classes("div", &[]);
        assert_eq!(el.client_rect_count(), 1);
        el.hide();
        assert_eq!(el.bounding_box(), Rect::default());
        assert_eq!(el.client_rect_count(), 0);
    }
}
