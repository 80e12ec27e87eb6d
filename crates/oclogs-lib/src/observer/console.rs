//! Console printer for deduplicated resource lines

use chrono::{DateTime, Utc};
use colored::{Color, Colorize};

use super::Observer;
use crate::dedup::DedupCache;
use crate::resources::{Resource, ResourceKind, DATE_FORMAT};

const NAMESPACE_COLORS: [Color; 8] = [
    Color::Red,
    Color::Green,
    Color::Blue,
    Color::Yellow,
    Color::Cyan,
    Color::Magenta,
    Color::White,
    Color::Black,
];

/// Terminal styling, a no-op when color is off
#[derive(Debug, Clone, Copy)]
pub struct Style {
    color: bool,
}

impl Style {
    pub fn new(color: bool) -> Self {
        Self { color }
    }

    pub fn plain() -> Self {
        Self::new(false)
    }

    /// Color a name by a stable hash of its characters
    pub fn by_name(&self, name: &str) -> String {
        if !self.color {
            return name.to_string();
        }
        let sum: usize = name.chars().map(|c| c as usize).sum();
        name.color(NAMESPACE_COLORS[sum % NAMESPACE_COLORS.len()])
            .to_string()
    }

    pub fn white(&self, text: &str) -> String {
        if self.color {
            text.white().to_string()
        } else {
            text.to_string()
        }
    }

    /// 80-column frame with a centered title, and its closing rule
    pub fn banner(&self, title: &str) -> (String, String) {
        (
            self.white(&format!("{:*^80}", title)),
            self.white(&"*".repeat(80)),
        )
    }
}

/// Prints each resource once, keyed by its canonical text
pub struct Console {
    dedup: DedupCache,
    style: Style,
}

impl Console {
    pub fn new(dedup: DedupCache, style: Style) -> Self {
        Self { dedup, style }
    }

    /// The line to print for `resource`, or `None` when it was already printed
    /// or was last reported before the cutoff
    pub fn render(&self, resource: &Resource, now: DateTime<Utc>) -> Option<String> {
        if self.dedup.check_and_mark(&resource.to_string(), now) {
            return None;
        }

        let fresh = resource
            .last_seen()
            .map_or(true, |last_seen| last_seen > self.dedup.since());
        fresh.then(|| self.styled(resource))
    }

    fn styled(&self, resource: &Resource) -> String {
        let style = &self.style;
        match resource {
            Resource::Pod(pod) => format!(
                "{} {}: [{}] {}",
                pod.started.format(DATE_FORMAT),
                style.by_name(&pod.namespace),
                pod.status,
                style.white(&pod.name)
            ),
            Resource::Event(event) => format!(
                "{} {}: [{}] on {} - {}",
                event.last_seen.format(DATE_FORMAT),
                style.by_name(&event.namespace),
                event.reason,
                style.white(&format!("{}/{}", event.kind, event.name)),
                event.message
            ),
            Resource::Node(node) => format!(
                "{}: [{}] {}",
                style.white(&node.name),
                node.node_type,
                if node.ready { "Ready" } else { "NotReady" }
            ),
            Resource::Project(project) => format!(
                "{}: [{}]",
                style.by_name(&project.name),
                project.phase
            ),
        }
    }
}

impl Observer for Console {
    fn name(&self) -> &'static str {
        "console"
    }

    fn observe(&self, resource: &Resource, _feed: ResourceKind) {
        if let Some(line) = self.render(resource, Utc::now()) {
            println!("{line}");
        }
    }
}
