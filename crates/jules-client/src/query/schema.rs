//! Static field schema the Query Engine leans on for both validation and
//! execution, per the design note to avoid ad-hoc introspection.

use super::types::QuerySource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Stored,
    Computed,
}

/// Computed fields recognized for each source. Filtering one is a validation
/// error (§4.8); they are still selectable.
pub fn computed_fields(source: QuerySource) -> &'static [&'static str] {
    match source {
        QuerySource::Sessions => &["durationMs"],
        QuerySource::Activities => &["artifactCount", "summary"],
    }
}

pub fn field_kind(source: QuerySource, path: &str) -> FieldKind {
    let top = path.split('.').next().unwrap_or(path);
    if computed_fields(source).contains(&top) {
        FieldKind::Computed
    } else {
        FieldKind::Stored
    }
}

pub fn is_known_field(source: QuerySource, path: &str) -> bool {
    let top = path.split('.').next().unwrap_or(path);
    let known: &[&str] = match source {
        QuerySource::Sessions => &[
            "id",
            "createTime",
            "updateTime",
            "state",
            "prompt",
            "title",
            "sourceContext",
            "automationMode",
            "outputs",
            "url",
            "durationMs",
        ],
        QuerySource::Activities => &[
            "id",
            "createTime",
            "originator",
            "artifacts",
            "type",
            "artifactCount",
            "summary",
        ],
    };
    known.contains(&top) || top == "search"
}
