//! Line-based writer for generated Rust text with block indentation

const INDENT: &str = "    ";

#[derive(Debug, Default, Clone)]
pub struct RustWriter {
    out: String,
    indent: usize,
}

impl RustWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty writer at the same indentation, for output that may be discarded
    pub fn child(&self) -> Self {
        Self {
            out: String::new(),
            indent: self.indent,
        }
    }

    /// Append the lines of a child writer
    pub fn append(&mut self, other: RustWriter) {
        self.out.push_str(&other.out);
    }

    /// Write one line (multi-line text is indented line by line)
    pub fn line(&mut self, text: impl AsRef<str>) {
        for line in text.as_ref().lines() {
            if line.is_empty() {
                self.out.push('\n');
                continue;
            }
            for _ in 0..self.indent {
                self.out.push_str(INDENT);
            }
            self.out.push_str(line);
            self.out.push('\n');
        }
    }

    pub fn blank(&mut self) {
        if !self.out.is_empty() && !self.out.ends_with("\n\n") {
            self.out.push('\n');
        }
    }

    pub fn comment(&mut self, text: impl AsRef<str>) {
        for line in text.as_ref().lines() {
            self.line(format!("// {}", line).trim_end());
        }
    }

    /// Doc comment from a Python docstring
    pub fn doc(&mut self, doc: Option<&str>) {
        let Some(doc) = doc else { return };
        for line in dedent(doc).lines() {
            self.line(format!("/// {}", line).trim_end());
        }
    }

    /// `header {` and indent
    pub fn open(&mut self, header: impl AsRef<str>) {
        self.line(format!("{} {{", header.as_ref()));
        self.indent += 1;
    }

    /// Dedent and `}` followed by `suffix`
    pub fn close_with(&mut self, suffix: &str) {
        self.indent = self.indent.saturating_sub(1);
        self.line(format!("}}{}", suffix));
    }

    pub fn close(&mut self) {
        self.close_with("");
    }

    /// Dedent, write `} header {` and indent again
    pub fn reopen(&mut self, header: impl AsRef<str>) {
        self.indent = self.indent.saturating_sub(1);
        self.line(format!("}} {} {{", header.as_ref()));
        self.indent += 1;
    }

    pub fn is_empty(&self) -> bool {
        self.out.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.out
    }

    pub fn finish(self) -> String {
        self.out
    }
}

/// Strip the common leading whitespace of a docstring's continuation lines
fn dedent(doc: &str) -> String {
    let lines: Vec<&str> = doc.trim().lines().collect();
    let margin = lines
        .iter()
        .skip(1)
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0);
    lines
        .iter()
        .enumerate()
        .map(|(i, l)| {
            if i == 0 || l.len() < margin {
                l.trim().to_string()
            } else {
                l.get(margin..).unwrap_or(l).trim_end().to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocks_indent() {
        let mut w = RustWriter::new();
        w.open("fn main()");
        w.open("if x");
        w.line("y();");
        w.reopen("else");
        w.line("z();");
        w.close();
        w.close();
        assert_eq!(
            w.finish(),
            "fn main() {\n    if x {\n        y();\n    } else {\n        z();\n    }\n}\n"
        );
    }

    #[test]
    fn test_child_keeps_indent() {
        let mut w = RustWriter::new();
        w.open("fn f()");
        let mut c = w.child();
        c.line("a();");
        w.append(c);
        w.close();
        assert_eq!(w.finish(), "fn f() {\n    a();\n}\n");
    }

    #[test]
    fn test_doc_dedents_docstring() {
        let mut w = RustWriter::new();
        w.doc(Some("Summary.\n\n    Details here.\n    "));
        assert_eq!(w.finish(), "/// Summary.\n///\n/// Details here.\n");
    }
}
