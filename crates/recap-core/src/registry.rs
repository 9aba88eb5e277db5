//! Event type descriptions.
//!
//! Maps event type tags to the labels used in summaries and rendered
//! reports. The registry is built once at startup and passed by reference
//! into the components that need it.

use std::collections::BTreeMap;

/// How one event type is described to readers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventTypeDescriptor {
    /// Singular label, e.g. "Post published".
    pub label: String,
    /// Noun used when counting, e.g. "posts published".
    pub plural: String,
}

impl EventTypeDescriptor {
    pub fn new(label: impl Into<String>, plural: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            plural: plural.into(),
        }
    }
}

/// Lookup table from event type tag to descriptor.
#[derive(Debug, Clone, Default)]
pub struct EventTypeRegistry {
    descriptors: BTreeMap<String, EventTypeDescriptor>,
}

impl EventTypeRegistry {
    /// An empty registry; every lookup falls back to a humanized tag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the built-in activity types.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        let defaults = [
            ("post_published", "Post published", "posts published"),
            ("post_updated", "Post updated", "post updates"),
            ("post_deleted", "Post deleted", "posts deleted"),
            ("comment_posted", "Comment posted", "comments"),
            ("comment_moderated", "Comment moderated", "comments moderated"),
            ("user_registered", "User registered", "new users"),
            ("user_login", "User login", "logins"),
            ("plugin_activated", "Plugin activated", "plugin activations"),
            ("plugin_deactivated", "Plugin deactivated", "plugin deactivations"),
            ("setting_changed", "Setting changed", "setting changes"),
        ];
        for (tag, label, plural) in defaults {
            registry.register(tag, EventTypeDescriptor::new(label, plural));
        }
        registry
    }

    /// Add or replace the descriptor for a type.
    pub fn register(&mut self, event_type: impl Into<String>, descriptor: EventTypeDescriptor) {
        self.descriptors.insert(event_type.into(), descriptor);
    }

    pub fn get(&self, event_type: &str) -> Option<&EventTypeDescriptor> {
        self.descriptors.get(event_type)
    }

    pub fn label(&self, event_type: &str) -> String {
        self.get(event_type)
            .map(|d| d.label.clone())
            .unwrap_or_else(|| humanize(event_type))
    }

    pub fn plural(&self, event_type: &str) -> String {
        self.get(event_type)
            .map(|d| d.plural.clone())
            .unwrap_or_else(|| humanize(event_type).to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

/// "post_updated" -> "Post updated".
fn humanize(tag: &str) -> String {
    let spaced = tag.replace(['_', '-', '.'], " ");
    let mut chars = spaced.trim().chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_registered() {
        let registry = EventTypeRegistry::with_defaults();
        assert_eq!(registry.label("comment_posted"), "Comment posted");
        assert_eq!(registry.plural("comment_posted"), "comments");
        assert_eq!(registry.len(), 10);
    }

    #[test]
    fn test_unknown_type_is_humanized() {
        let registry = EventTypeRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.label("widget_moved"), "Widget moved");
        assert_eq!(registry.plural("order.refunded"), "order refunded");
        assert_eq!(registry.label(""), "");
    }

    #[test]
    fn test_register_overrides() {
        let mut registry = EventTypeRegistry::with_defaults();
        registry.register(
            "post_updated",
            EventTypeDescriptor::new("Article edited", "article edits"),
        );
        assert_eq!(registry.label("post_updated"), "Article edited");
    }
}
