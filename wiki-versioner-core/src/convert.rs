//! Markdown conversion for wiki bodies and Word documents.
//!
//! Confluence serves page bodies in its HTML-based storage format, and its
//! "Word" export (`.doc`) is HTML as well, so both go through
//! [`html_to_markdown`]. Real `.docx` files are handed to an external
//! converter (pandoc by default). Conversion is best-effort: a failure is
//! logged and reported as "unavailable", never as an error.

use std::path::Path;
use std::process::Command;
use std::sync::OnceLock;

#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;
use regex::Regex;
use tracing::{debug, warn};

#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
pub trait DocumentConverter {
    /// Markdown rendering of the document at `path`, or `None` when no
    /// rendering is available.
    fn to_markdown(&self, path: &Path) -> Option<String>;
}

/// Whether a file name has a Word document extension (`.doc`, `.docx`).
pub fn is_word_document(file_name: &str) -> bool {
    word_extension(file_name).is_some()
}

fn word_extension(file_name: &str) -> Option<String> {
    let (_, ext) = file_name.rsplit_once('.')?;
    let ext = ext.to_ascii_lowercase();
    matches!(ext.as_str(), "doc" | "docx").then_some(ext)
}

/// Name of the Markdown companion written next to a Word document:
/// `Document.docx` → `Document_docx.md`.
pub fn companion_name(file_name: &str) -> String {
    match file_name.rsplit_once('.') {
        Some((stem, ext)) => format!("{stem}_{}.md", ext.to_ascii_lowercase()),
        None => format!("{file_name}.md"),
    }
}

/// Converter used by the CLI.
#[derive(Debug, Clone)]
pub struct DefaultConverter {
    docx_command: String,
}

impl Default for DefaultConverter {
    fn default() -> Self {
        Self {
            docx_command: "pandoc".to_string(),
        }
    }
}

impl DefaultConverter {
    pub fn new(docx_command: impl Into<String>) -> Self {
        Self {
            docx_command: docx_command.into(),
        }
    }

    fn convert_docx(&self, path: &Path) -> Option<String> {
        let output = Command::new(&self.docx_command)
            .args(["-f", "docx", "-t", "gfm", "--wrap=none"])
            .arg(path)
            .output();
        match output {
            Ok(out) if out.status.success() => {
                Some(String::from_utf8_lossy(&out.stdout).into_owned())
            }
            Ok(out) => {
                warn!(
                    path = %path.display(),
                    converter = %self.docx_command,
                    stderr = %String::from_utf8_lossy(&out.stderr).trim(),
                    "Failed to convert document to markdown"
                );
                None
            }
            Err(e) => {
                warn!(
                    path = %path.display(),
                    converter = %self.docx_command,
                    error = %e,
                    "Document converter unavailable"
                );
                None
            }
        }
    }
}

impl DocumentConverter for DefaultConverter {
    fn to_markdown(&self, path: &Path) -> Option<String> {
        let file_name = path.file_name()?.to_string_lossy().into_owned();
        match word_extension(&file_name)?.as_str() {
            "docx" => self.convert_docx(path),
            _ => match std::fs::read(path) {
                Ok(bytes) => Some(html_to_markdown(&String::from_utf8_lossy(&bytes))),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to read document for conversion");
                    None
                }
            },
        }
    }
}

fn regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("conversion pattern is valid"))
}

/// Convert Confluence storage HTML (or a Word-as-HTML export) to Markdown.
///
/// This is a tag-level rewrite, not a full HTML parser: headings, paragraphs,
/// lists, emphasis, code, links and line breaks are translated; every other
/// tag is dropped and its text kept.
pub fn html_to_markdown(html: &str) -> String {
    static SKIP: OnceLock<Regex> = OnceLock::new();
    static PRE: OnceLock<Regex> = OnceLock::new();
    static HEADING: OnceLock<Regex> = OnceLock::new();
    static LINK: OnceLock<Regex> = OnceLock::new();
    static STRONG: OnceLock<Regex> = OnceLock::new();
    static EM: OnceLock<Regex> = OnceLock::new();
    static CODE: OnceLock<Regex> = OnceLock::new();
    static LIST_ITEM: OnceLock<Regex> = OnceLock::new();
    static BREAK: OnceLock<Regex> = OnceLock::new();
    static BLOCK: OnceLock<Regex> = OnceLock::new();
    static TAG: OnceLock<Regex> = OnceLock::new();
    static BLANK_RUN: OnceLock<Regex> = OnceLock::new();

    let mut md = regex(
        &SKIP,
        r"(?is)<(head|style|script)\b[^>]*>.*?</(head|style|script)>|<!--.*?-->",
    )
    .replace_all(html, "")
    .into_owned();

    md = regex(&PRE, r"(?is)<pre\b[^>]*>(.*?)</pre>")
        .replace_all(&md, "\n```\n$1\n```\n")
        .into_owned();
    md = regex(&HEADING, r"(?is)<h([1-6])\b[^>]*>(.*?)</h[1-6]>")
        .replace_all(&md, |caps: &regex::Captures| {
            let level: usize = caps[1].parse().unwrap_or(1);
            format!("\n\n{} {}\n\n", "#".repeat(level), caps[2].trim())
        })
        .into_owned();
    md = regex(&LINK, r#"(?is)<a\b[^>]*?href="([^"]*)"[^>]*>(.*?)</a>"#)
        .replace_all(&md, "[$2]($1)")
        .into_owned();
    md = regex(&STRONG, r"(?is)<(?:strong|b)\b[^>]*>(.*?)</(?:strong|b)>")
        .replace_all(&md, "**$1**")
        .into_owned();
    md = regex(&EM, r"(?is)<(?:em|i)\b[^>]*>(.*?)</(?:em|i)>")
        .replace_all(&md, "_${1}_")
        .into_owned();
    md = regex(&CODE, r"(?is)<code\b[^>]*>(.*?)</code>")
        .replace_all(&md, "`$1`")
        .into_owned();
    md = regex(&LIST_ITEM, r"(?is)<li\b[^>]*>")
        .replace_all(&md, "\n- ")
        .into_owned();
    md = regex(&BREAK, r"(?i)<br\s*/?>")
        .replace_all(&md, "\n")
        .into_owned();
    md = regex(&BLOCK, r"(?i)</?(p|div|ul|ol|table|tr)\b[^>]*>")
        .replace_all(&md, "\n\n")
        .into_owned();
    md = regex(&TAG, r"(?s)<[^>]+>").replace_all(&md, "").into_owned();

    md = decode_entities(&md);
    let md = md
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n");
    let md = regex(&BLANK_RUN, r"\n{3,}").replace_all(&md, "\n\n");
    let out = format!("{}\n", md.trim());
    debug!(input_len = html.len(), output_len = out.len(), "Converted HTML to markdown");
    out
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_common_storage_markup() {
        let html = r#"<h1>Title</h1><p>Some <strong>bold</strong> and <em>italic</em> text with <a href="https://example.com">a link</a>.</p><ul><li>one</li><li>two</li></ul><p>x &amp; y &lt;z&gt;</p>"#;
        let md = html_to_markdown(html);
        assert!(md.starts_with("# Title\n"), "got: {md}");
        assert!(md.contains("Some **bold** and _italic_ text"));
        assert!(md.contains("[a link](https://example.com)"));
        assert!(md.contains("- one\n- two"));
        assert!(md.contains("x & y <z>"));
        assert!(!md.contains('<') || md.contains("<z>"));
        assert!(!md.contains("\n\n\n"));
    }

    #[test]
    fn drops_head_and_style_content() {
        let html = "<html><head><title>T</title><style>p{}</style></head><body><p>Body</p></body></html>";
        assert_eq!(html_to_markdown(html), "Body\n");
    }

    #[test]
    fn pre_blocks_become_fences() {
        let md = html_to_markdown("<pre>let x = 1;</pre>");
        assert!(md.contains("```\nlet x = 1;\n```"));
    }

    #[test]
    fn companion_names_use_lowercase_extension() {
        assert_eq!(companion_name("Document.docx"), "Document_docx.md");
        assert_eq!(companion_name("Legacy Spec.DOC"), "Legacy Spec_doc.md");
    }

    #[test]
    fn word_detection_is_case_insensitive() {
        assert!(is_word_document("a.DOCX"));
        assert!(is_word_document("a.doc"));
        assert!(!is_word_document("a.md"));
        assert!(!is_word_document("docx"));
    }

    #[test]
    fn doc_exports_are_read_as_html() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("Page_1.doc");
        std::fs::write(&path, "<html><body><h2>Heading</h2><p>text</p></body></html>").unwrap();
        let md = DefaultConverter::default().to_markdown(&path).unwrap();
        assert_eq!(md, "## Heading\n\ntext\n");
    }

    #[test]
    fn missing_docx_converter_is_unavailable() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("a.docx");
        std::fs::write(&path, b"PK\x03\x04").unwrap();
        let converter = DefaultConverter::new("definitely-not-a-real-converter-binary");
        assert_eq!(converter.to_markdown(&path), None);
    }

    #[test]
    fn non_word_files_are_unavailable() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("a.json");
        std::fs::write(&path, "{}").unwrap();
        assert_eq!(DefaultConverter::default().to_markdown(&path), None);
    }
}
