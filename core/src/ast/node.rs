//! file: core/src/ast/node.rs
//! description: the module AST consumed by the lowering engine.
//!
//! Nodes are produced by an external parser and handed over as JSON. Each
//! `Expr`/`Stmt` carries its kind flattened next to an optional location,
//! so a node reads like `{"type": "Name", "id": "x", "location": {...}}`.
//! The tree is never mutated after loading.
//!
use serde::{Deserialize, Serialize};

use super::kind::{BinOperator, BoolOperator, CmpOperator, UnaryOperator};
use crate::location::Location;

/// A parsed source module.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Module {
    #[serde(default)]
    pub body: Vec<Stmt>,
}

/// Literal payload of a `Constant` node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Constant {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    #[serde(flatten)]
    pub kind: ExprKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stmt {
    #[serde(flatten)]
    pub kind: StmtKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Arg {
    pub arg: String,
    #[serde(default)]
    pub annotation: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Keyword {
    /// `None` for `**kwargs` splats.
    #[serde(default)]
    pub arg: Option<String>,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alias {
    pub name: String,
    #[serde(default)]
    pub asname: Option<String>,
}

impl Alias {
    /// The name the import binds in the importing module.
    pub fn bound_name(&self) -> &str {
        match &self.asname {
            Some(alias) => alias,
            // `import a.b` binds `a`
            None => self.name.split('.').next().unwrap_or(&self.name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comprehension {
    pub target: Expr,
    pub iter: Expr,
    #[serde(default)]
    pub ifs: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceptHandler {
    #[serde(rename = "type", default)]
    pub exc_type: Option<Expr>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WithItem {
    pub context_expr: Expr,
    #[serde(default)]
    pub optional_vars: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExprKind {
    Constant { value: Constant },
    Name { id: String },
    BinOp { left: Box<Expr>, op: BinOperator, right: Box<Expr> },
    UnaryOp { op: UnaryOperator, operand: Box<Expr> },
    BoolOp { op: BoolOperator, values: Vec<Expr> },
    Compare { left: Box<Expr>, ops: Vec<CmpOperator>, comparators: Vec<Expr> },
    Call {
        func: Box<Expr>,
        #[serde(default)]
        args: Vec<Expr>,
        #[serde(default)]
        keywords: Vec<Keyword>,
    },
    IfExp { test: Box<Expr>, body: Box<Expr>, orelse: Box<Expr> },
    List {
        #[serde(default)]
        elts: Vec<Expr>,
    },
    Tuple {
        #[serde(default)]
        elts: Vec<Expr>,
    },
    Set {
        #[serde(default)]
        elts: Vec<Expr>,
    },
    Dict {
        /// `None` marks a `**mapping` splat.
        #[serde(default)]
        keys: Vec<Option<Expr>>,
        #[serde(default)]
        values: Vec<Expr>,
    },
    Subscript { value: Box<Expr>, slice: Box<Expr> },
    Slice {
        #[serde(default)]
        lower: Option<Box<Expr>>,
        #[serde(default)]
        upper: Option<Box<Expr>>,
        #[serde(default)]
        step: Option<Box<Expr>>,
    },
    Attribute { value: Box<Expr>, attr: String },
    JoinedStr {
        #[serde(default)]
        values: Vec<Expr>,
    },
    FormattedValue {
        value: Box<Expr>,
        #[serde(default)]
        format_spec: Option<String>,
    },
    Lambda {
        #[serde(default)]
        args: Vec<Arg>,
        body: Box<Expr>,
    },
    ListComp { elt: Box<Expr>, generators: Vec<Comprehension> },
    SetComp { elt: Box<Expr>, generators: Vec<Comprehension> },
    GeneratorExp { elt: Box<Expr>, generators: Vec<Comprehension> },
    DictComp { key: Box<Expr>, value: Box<Expr>, generators: Vec<Comprehension> },
    Await { value: Box<Expr> },
    Yield {
        #[serde(default)]
        value: Option<Box<Expr>>,
    },
    Starred { value: Box<Expr> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StmtKind {
    FunctionDef {
        name: String,
        #[serde(default)]
        args: Vec<Arg>,
        #[serde(default)]
        body: Vec<Stmt>,
        #[serde(default)]
        returns: Option<Expr>,
        #[serde(default)]
        decorator_list: Vec<Expr>,
        #[serde(default)]
        is_async: bool,
    },
    ClassDef {
        name: String,
        #[serde(default)]
        bases: Vec<Expr>,
        #[serde(default)]
        body: Vec<Stmt>,
    },
    Return {
        #[serde(default)]
        value: Option<Expr>,
    },
    Delete { targets: Vec<Expr> },
    Assign { targets: Vec<Expr>, value: Expr },
    AnnAssign {
        target: Expr,
        annotation: Expr,
        #[serde(default)]
        value: Option<Expr>,
    },
    AugAssign { target: Expr, op: BinOperator, value: Expr },
    For {
        target: Expr,
        iter: Expr,
        #[serde(default)]
        body: Vec<Stmt>,
        #[serde(default)]
        orelse: Vec<Stmt>,
    },
    While {
        test: Expr,
        #[serde(default)]
        body: Vec<Stmt>,
        #[serde(default)]
        orelse: Vec<Stmt>,
    },
    If {
        test: Expr,
        #[serde(default)]
        body: Vec<Stmt>,
        #[serde(default)]
        orelse: Vec<Stmt>,
    },
    With {
        items: Vec<WithItem>,
        #[serde(default)]
        body: Vec<Stmt>,
    },
    Raise {
        #[serde(default)]
        exc: Option<Expr>,
    },
    Try {
        #[serde(default)]
        body: Vec<Stmt>,
        #[serde(default)]
        handlers: Vec<ExceptHandler>,
        #[serde(default)]
        orelse: Vec<Stmt>,
        #[serde(default)]
        finalbody: Vec<Stmt>,
    },
    Assert {
        test: Expr,
        #[serde(default)]
        msg: Option<Expr>,
    },
    Import { names: Vec<Alias> },
    ImportFrom {
        #[serde(default)]
        module: Option<String>,
        names: Vec<Alias>,
    },
    Global { names: Vec<String> },
    Nonlocal { names: Vec<String> },
    Expr { value: Expr },
    Pass,
    Break,
    Continue,
}

impl Expr {
    pub fn new(kind: ExprKind, location: Option<Location>) -> Self {
        Expr { kind, location }
    }

    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    /// The identifier when this node is a bare `Name`.
    pub fn as_name(&self) -> Option<&str> {
        match &self.kind {
            ExprKind::Name { id } => Some(id),
            _ => None,
        }
    }

    /// The integer value when this node is an integer literal, including a
    /// negated literal such as `-1`.
    pub fn as_int_literal(&self) -> Option<i64> {
        match &self.kind {
            ExprKind::Constant { value: Constant::Int(v) } => Some(*v),
            ExprKind::UnaryOp { op: UnaryOperator::USub, operand } => {
                operand.as_int_literal().map(|v| -v)
            }
            _ => None,
        }
    }

    pub fn as_str_literal(&self) -> Option<&str> {
        match &self.kind {
            ExprKind::Constant { value: Constant::Str(s) } => Some(s),
            _ => None,
        }
    }

    pub fn is_none_literal(&self) -> bool {
        matches!(&self.kind, ExprKind::Constant { value: Constant::None })
    }

    /// Node name as spelled in the Python `ast` module.
    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            ExprKind::Constant { .. } => "Constant",
            ExprKind::Name { .. } => "Name",
            ExprKind::BinOp { .. } => "BinOp",
            ExprKind::UnaryOp { .. } => "UnaryOp",
            ExprKind::BoolOp { .. } => "BoolOp",
            ExprKind::Compare { .. } => "Compare",
            ExprKind::Call { .. } => "Call",
            ExprKind::IfExp { .. } => "IfExp",
            ExprKind::List { .. } => "List",
            ExprKind::Tuple { .. } => "Tuple",
            ExprKind::Set { .. } => "Set",
            ExprKind::Dict { .. } => "Dict",
            ExprKind::Subscript { .. } => "Subscript",
            ExprKind::Slice { .. } => "Slice",
            ExprKind::Attribute { .. } => "Attribute",
            ExprKind::JoinedStr { .. } => "JoinedStr",
            ExprKind::FormattedValue { .. } => "FormattedValue",
            ExprKind::Lambda { .. } => "Lambda",
            ExprKind::ListComp { .. } => "ListComp",
            ExprKind::SetComp { .. } => "SetComp",
            ExprKind::GeneratorExp { .. } => "GeneratorExp",
            ExprKind::DictComp { .. } => "DictComp",
            ExprKind::Await { .. } => "Await",
            ExprKind::Yield { .. } => "Yield",
            ExprKind::Starred { .. } => "Starred",
        }
    }
}

impl Stmt {
    pub fn new(kind: StmtKind, location: Option<Location>) -> Self {
        Stmt { kind, location }
    }

    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            StmtKind::FunctionDef { .. } => "FunctionDef",
            StmtKind::ClassDef { .. } => "ClassDef",
            StmtKind::Return { .. } => "Return",
            StmtKind::Delete { .. } => "Delete",
            StmtKind::Assign { .. } => "Assign",
            StmtKind::AnnAssign { .. } => "AnnAssign",
            StmtKind::AugAssign { .. } => "AugAssign",
            StmtKind::For { .. } => "For",
            StmtKind::While { .. } => "While",
            StmtKind::If { .. } => "If",
            StmtKind::With { .. } => "With",
            StmtKind::Raise { .. } => "Raise",
            StmtKind::Try { .. } => "Try",
            StmtKind::Assert { .. } => "Assert",
            StmtKind::Import { .. } => "Import",
            StmtKind::ImportFrom { .. } => "ImportFrom",
            StmtKind::Global { .. } => "Global",
            StmtKind::Nonlocal { .. } => "Nonlocal",
            StmtKind::Expr { .. } => "Expr",
            StmtKind::Pass => "Pass",
            StmtKind::Break => "Break",
            StmtKind::Continue => "Continue",
        }
    }
}
