//! file: core/src/lower/writer.rs
//! description: indentation-aware text accumulator.
//!
//! Lowering functions return owned text; a `CodeWriter` only collects
//! statement lines for one body. Multi-line fragments (labeled block
//! expressions) are written relative to column zero and re-indented here.
//!

#[derive(Debug, Clone)]
pub struct CodeWriter {
    unit: String,
    level: usize,
    out: String,
}

impl CodeWriter {
    pub fn new(unit: &str) -> Self {
        CodeWriter { unit: unit.to_string(), level: 0, out: String::new() }
    }

    /// Write `text`, which may span several lines, at the current level.
    pub fn line(&mut self, text: &str) {
        for l in text.lines() {
            if l.trim().is_empty() {
                self.out.push('\n');
                continue;
            }
            for _ in 0..self.level {
                self.out.push_str(&self.unit);
            }
            self.out.push_str(l);
            self.out.push('\n');
        }
        if text.is_empty() {
            self.out.push('\n');
        }
    }

    pub fn blank(&mut self) {
        if !self.out.is_empty() && !self.out.ends_with("\n\n") {
            self.out.push('\n');
        }
    }

    /// `header {` and one level deeper.
    pub fn open(&mut self, header: &str) {
        if header.is_empty() {
            self.line("{");
        } else {
            self.line(&format!("{} {{", header));
        }
        self.level += 1;
    }

    /// Back one level and `}` followed by `suffix`.
    pub fn close(&mut self, suffix: &str) {
        self.level = self.level.saturating_sub(1);
        self.line(&format!("}}{}", suffix));
    }

    /// `} text {` at the enclosing level, staying one level deeper.
    pub fn reopen(&mut self, text: &str) {
        self.level = self.level.saturating_sub(1);
        self.line(&format!("}} {} {{", text));
        self.level += 1;
    }

    /// Append another writer's text, indented at the current level.
    pub fn append(&mut self, other: &CodeWriter) {
        self.line(other.as_str());
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

/// Indent every line of `text` by one `unit`.
pub fn indent(text: &str, unit: &str) -> String {
    text.lines()
        .map(|l| if l.trim().is_empty() { String::new() } else { format!("{}{}", unit, l) })
        .collect::<Vec<_>>()
        .join("\n")
}

/// A labeled block expression running `stmts` and yielding `result`.
pub fn block_expr(label: &str, stmts: &[String], result: &str, unit: &str) -> String {
    let mut out = format!("{}: {{\n", label);
    for stmt in stmts {
        out.push_str(&indent(stmt, unit));
        out.push('\n');
    }
    out.push_str(&format!("{}break :{} {};\n}}", unit, label, result));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_text_is_reindented() {
        let mut w = CodeWriter::new("    ");
        w.open("fn f() void");
        w.line("const x = blk: {\n    break :blk 1;\n};");
        w.close("");
        assert_eq!(w.finish(), "fn f() void {\n    const x = blk: {\n        break :blk 1;\n    };\n}\n");
    }

    #[test]
    fn else_branches_reopen_at_the_same_level() {
        let mut w = CodeWriter::new("  ");
        w.open("if (a)");
        w.line("x();");
        w.reopen("else");
        w.line("y();");
        w.close("");
        assert_eq!(w.finish(), "if (a) {\n  x();\n} else {\n  y();\n}\n");
    }

    #[test]
    fn block_expression_layout() {
        let text = block_expr("b", &["var s: i64 = 0;".to_string()], "s", "  ");
        assert_eq!(text, "b: {\n  var s: i64 = 0;\n  break :b s;\n}");
    }
}
