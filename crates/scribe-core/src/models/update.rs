//! Partial updates of a documented file.

use serde::{Deserialize, Serialize};

use super::{FileDocumentation, SymbolTable};

/// One field of a [`FileDocumentation`] that may be changed in place.
///
/// The set is closed: identity fields (`filepath`, `filename`) and the
/// documentation timestamp are not updatable, and there is no way to name an
/// arbitrary column.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "field", content = "value", rename_all = "snake_case")]
pub enum DocumentUpdate {
    Overview(String),
    DddContext(Option<String>),
    Functions(SymbolTable),
    Exports(SymbolTable),
    Imports(SymbolTable),
    TypesInterfacesClasses(SymbolTable),
    Constants(SymbolTable),
    Dependencies(Vec<String>),
    OtherNotes(Vec<String>),
    FullContent(Option<String>),
    DocumentedAtCommit(Option<String>),
    ContentHash(Option<String>),
}

impl DocumentUpdate {
    /// Column backing this field.
    pub fn column(&self) -> &'static str {
        match self {
            DocumentUpdate::Overview(_) => "overview",
            DocumentUpdate::DddContext(_) => "ddd_context",
            DocumentUpdate::Functions(_) => "functions",
            DocumentUpdate::Exports(_) => "exports",
            DocumentUpdate::Imports(_) => "imports",
            DocumentUpdate::TypesInterfacesClasses(_) => "types_interfaces_classes",
            DocumentUpdate::Constants(_) => "constants",
            DocumentUpdate::Dependencies(_) => "dependencies",
            DocumentUpdate::OtherNotes(_) => "other_notes",
            DocumentUpdate::FullContent(_) => "full_content",
            DocumentUpdate::DocumentedAtCommit(_) => "documented_at_commit",
            DocumentUpdate::ContentHash(_) => "content_hash",
        }
    }

    /// Applies the update to an in-memory record.
    pub fn apply(self, doc: &mut FileDocumentation) {
        match self {
            DocumentUpdate::Overview(v) => doc.overview = v,
            DocumentUpdate::DddContext(v) => doc.ddd_context = v,
            DocumentUpdate::Functions(v) => doc.functions = v,
            DocumentUpdate::Exports(v) => doc.exports = v,
            DocumentUpdate::Imports(v) => doc.imports = v,
            DocumentUpdate::TypesInterfacesClasses(v) => doc.types_interfaces_classes = v,
            DocumentUpdate::Constants(v) => doc.constants = v,
            DocumentUpdate::Dependencies(v) => doc.dependencies = v,
            DocumentUpdate::OtherNotes(v) => doc.other_notes = v,
            DocumentUpdate::FullContent(v) => doc.full_content = v,
            DocumentUpdate::DocumentedAtCommit(v) => doc.documented_at_commit = v,
            DocumentUpdate::ContentHash(v) => doc.content_hash = v,
        }
    }
}
