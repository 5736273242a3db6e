//! External viewer programs registered per MIME type

use serde::{Deserialize, Serialize};

/// A program able to display one MIME type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewer {
    /// Command template; `$1` stands for the document path
    pub program: String,
    pub mime_type: String,
}

impl Viewer {
    /// Command line opening `document` with this viewer
    pub fn command_for(&self, document: &str) -> String {
        viewer_command(&self.program, document)
    }
}

/// Build a viewer command line
///
/// The document path is quoted when it contains spaces. It replaces every
/// `$1` in the template, or is appended when the template has none.
pub fn viewer_command(template: &str, document: &str) -> String {
    let template = template.trim();
    let document = if document.contains(' ') {
        format!("\"{}\"", document)
    } else {
        document.to_string()
    };

    if template.contains("$1") {
        template.replace("$1", &document)
    } else {
        format!("{} {}", template, document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_appends_document() {
        assert_eq!(viewer_command("evince", "/tmp/a.pdf"), "evince /tmp/a.pdf");
    }

    #[test]
    fn test_substitutes_placeholder() {
        assert_eq!(
            viewer_command(" gimp --new $1 ", "/tmp/a.png"),
            "gimp --new /tmp/a.png"
        );
    }

    #[test]
    fn test_quotes_paths_with_spaces() {
        let viewer = Viewer {
            program: "less".into(),
            mime_type: "text/plain".into(),
        };
        assert_eq!(
            viewer.command_for("/tmp/my notes.txt"),
            "less \"/tmp/my notes.txt\""
        );
    }
}
