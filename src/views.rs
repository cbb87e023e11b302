use std::collections::BTreeMap;

use crate::name::PackageName;
use crate::types::{Exports, Value};

const ROOT: usize = 0;

#[derive(Debug, Default)]
struct ViewNode {
    value: Option<Value>,
    children: BTreeMap<String, usize>,
}

/// Published packages in an arena tree keyed by name component. A view of
/// `a.b.*` is rendered on demand from the subtree under `a.b`.
#[derive(Debug)]
pub(crate) struct PatternViews {
    nodes: Vec<ViewNode>,
}

impl PatternViews {
    pub fn new() -> Self {
        Self {
            nodes: vec![ViewNode::default()],
        }
    }

    /// Records `value` under every component of `name`.
    pub fn publish(&mut self, name: &PackageName, value: &Value) {
        let mut current = ROOT;
        for component in name.components() {
            current = match self.nodes[current].children.get(component) {
                Some(&child) => child,
                None => {
                    let child = self.nodes.len();
                    self.nodes.push(ViewNode::default());
                    self.nodes[current]
                        .children
                        .insert(component.to_string(), child);
                    child
                }
            };
        }
        self.nodes[current].value = Some(value.clone());
    }

    /// The view for a wildcard name, or `None` if nothing is published under it.
    pub fn view(&self, wildcard: &PackageName) -> Option<Value> {
        let base = wildcard.wildcard_base()?;
        let mut current = ROOT;
        if !base.is_empty() {
            for component in base.split('.') {
                current = *self.nodes[current].children.get(component)?;
            }
        }
        let node = &self.nodes[current];
        if node.children.is_empty() {
            return None;
        }
        Some(Value::object(self.render_children(node)))
    }

    fn render_children(&self, node: &ViewNode) -> Exports {
        node.children
            .iter()
            .map(|(key, &child)| (key.clone(), self.render(child)))
            .collect()
    }

    /// A node with a value renders as that value; if the value is an object
    /// and sub-packages were published below it, they are merged in without
    /// shadowing the value's own members.
    fn render(&self, index: usize) -> Value {
        let node = &self.nodes[index];
        match &node.value {
            Some(value) if node.children.is_empty() => value.clone(),
            Some(Value::Object(own)) => {
                let mut merged = (**own).clone();
                for (key, child) in self.render_children(node) {
                    merged.entry(key).or_insert(child);
                }
                Value::object(merged)
            }
            Some(value) => value.clone(),
            None => Value::object(self.render_children(node)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn name(raw: &str) -> PackageName {
        PackageName::parse(raw).unwrap()
    }

    #[test]
    fn every_level_sees_the_same_value() {
        let mut views = PatternViews::new();
        let value = Value::data(json!({"x": 1}));
        views.publish(&name("a.b.c"), &value);

        let direct = views.view(&name("a.b.*")).unwrap();
        assert!(direct.get("c").unwrap().ptr_eq(&value));

        let nested = views.view(&name("a.*")).unwrap();
        assert!(nested.get("b").unwrap().get("c").unwrap().ptr_eq(&value));

        let root = views.view(&name("*")).unwrap();
        let leaf = root.get("a").unwrap().get("b").unwrap().get("c").unwrap();
        assert!(leaf.ptr_eq(&value));
    }

    #[test]
    fn siblings_accumulate() {
        let mut views = PatternViews::new();
        views.publish(&name("a.x"), &Value::data(json!(1)));
        views.publish(&name("a.y"), &Value::data(json!(2)));
        let view = views.view(&name("a.*")).unwrap();
        assert_eq!(view.to_json(), json!({"x": 1, "y": 2}));
        assert!(views.view(&name("b.*")).is_none());
    }

    #[test]
    fn object_packages_merge_their_children() {
        let mut views = PatternViews::new();
        let parent = Value::object(Exports::from([(
            "version".to_string(),
            Value::data(json!("1.0")),
        )]));
        views.publish(&name("a.b"), &parent);
        views.publish(&name("a.b.c"), &Value::data(json!(true)));
        let view = views.view(&name("a.*")).unwrap();
        assert_eq!(view.to_json(), json!({"b": {"version": "1.0", "c": true}}));
    }
}
