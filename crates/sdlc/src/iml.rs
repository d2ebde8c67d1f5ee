//! The typed IML output representation.
//!
//! The parser-builder emits these trees; `driver::emit` renders them to
//! canonical IML text for the external back-end. The representation is
//! deliberately small: it covers exactly the constructs the builder
//! produces, and printing round-trips through the IML parser for valid
//! input.

use std::fmt::{self, Write};

/// An IML type.
#[derive(Debug, Clone, PartialEq)]
pub enum ImlType {
    Void,
    Bool,
    UInt(u16),
    SInt(u16),
    Real,
    Bytes,
    String,
    Stream,
    View,
    Iterator,
    Error,
    Sink,
    Any,
    Tuple(Vec<ImlType>),
    Vector(Box<ImlType>),
    Optional(Box<ImlType>),
    Ref(Box<ImlType>),
    Named(String),
}

impl fmt::Display for ImlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Void => f.write_str("void"),
            Self::Bool => f.write_str("bool"),
            Self::UInt(w) => write!(f, "uint{w}"),
            Self::SInt(w) => write!(f, "int{w}"),
            Self::Real => f.write_str("real"),
            Self::Bytes => f.write_str("bytes"),
            Self::String => f.write_str("string"),
            Self::Stream => f.write_str("stream"),
            Self::View => f.write_str("view"),
            Self::Iterator => f.write_str("iterator"),
            Self::Error => f.write_str("error"),
            Self::Sink => f.write_str("sink"),
            Self::Any => f.write_str("any"),
            Self::Tuple(elems) => {
                f.write_str("tuple<")?;
                for (i, e) in elems.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{e}")?;
                }
                f.write_str(">")
            }
            Self::Vector(inner) => write!(f, "vector<{inner}>"),
            Self::Optional(inner) => write!(f, "optional<{inner}>"),
            Self::Ref(inner) => write!(f, "strong_ref<{inner}>"),
            Self::Named(id) => f.write_str(id),
        }
    }
}

/// An IML expression.
#[derive(Debug, Clone, PartialEq)]
pub enum ImlExpr {
    Name(String),
    Bool(bool),
    UInt { value: u64, width: u16 },
    SInt { value: i64, width: u16 },
    Real(f64),
    Str(String),
    BytesLit(Vec<u8>),
    Null,
    Member(Box<ImlExpr>, String),
    Index(Box<ImlExpr>, Box<ImlExpr>),
    Call {
        id: String,
        args: Vec<ImlExpr>,
    },
    MethodCall {
        object: Box<ImlExpr>,
        method: String,
        args: Vec<ImlExpr>,
    },
    Binary {
        op: &'static str,
        lhs: Box<ImlExpr>,
        rhs: Box<ImlExpr>,
    },
    Unary {
        op: &'static str,
        operand: Box<ImlExpr>,
    },
    Ternary {
        cond: Box<ImlExpr>,
        then: Box<ImlExpr>,
        alt: Box<ImlExpr>,
    },
    Tuple(Vec<ImlExpr>),
    /// `|e|`: the size of a value.
    SizeOf(Box<ImlExpr>),
    /// `unpack<T>(args…)`: returns `(value, remaining_view)`.
    Unpack {
        ty: ImlType,
        args: Vec<ImlExpr>,
    },
}

impl ImlExpr {
    pub fn name(id: impl Into<String>) -> Self {
        Self::Name(id.into())
    }

    pub fn member(object: ImlExpr, id: impl Into<String>) -> Self {
        Self::Member(Box::new(object), id.into())
    }

    pub fn call(id: impl Into<String>, args: Vec<ImlExpr>) -> Self {
        Self::Call { id: id.into(), args }
    }

    pub fn method(object: ImlExpr, method: impl Into<String>, args: Vec<ImlExpr>) -> Self {
        Self::MethodCall {
            object: Box::new(object),
            method: method.into(),
            args,
        }
    }

    pub fn binary(op: &'static str, lhs: ImlExpr, rhs: ImlExpr) -> Self {
        Self::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn uint(value: u64) -> Self {
        Self::UInt { value, width: 64 }
    }
}

impl fmt::Display for ImlExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(id) => f.write_str(id),
            Self::Bool(true) => f.write_str("True"),
            Self::Bool(false) => f.write_str("False"),
            Self::UInt { value, .. } => write!(f, "{value}"),
            Self::SInt { value, .. } => write!(f, "{value}"),
            Self::Real(value) => write!(f, "{value}"),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::BytesLit(data) => {
                f.write_str("b\"")?;
                for &b in data {
                    if b.is_ascii_graphic() && b != b'"' && b != b'\\' {
                        f.write_char(char::from(b))?;
                    } else {
                        write!(f, "\\x{b:02x}")?;
                    }
                }
                f.write_str("\"")
            }
            Self::Null => f.write_str("Null"),
            Self::Member(object, id) => write!(f, "{object}.{id}"),
            Self::Index(object, index) => write!(f, "{object}[{index}]"),
            Self::Call { id, args } => {
                write!(f, "{id}(")?;
                print_args(f, args)?;
                f.write_str(")")
            }
            Self::MethodCall { object, method, args } => {
                write!(f, "{object}.{method}(")?;
                print_args(f, args)?;
                f.write_str(")")
            }
            Self::Binary { op, lhs, rhs } => write!(f, "({lhs} {op} {rhs})"),
            Self::Unary { op, operand } => write!(f, "{op}{operand}"),
            Self::Ternary { cond, then, alt } => write!(f, "({cond} ? {then} : {alt})"),
            Self::Tuple(elems) => {
                f.write_str("(")?;
                for (i, e) in elems.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{e}")?;
                }
                if elems.len() == 1 {
                    f.write_str(",")?;
                }
                f.write_str(")")
            }
            Self::SizeOf(inner) => write!(f, "|{inner}|"),
            Self::Unpack { ty, args } => {
                write!(f, "unpack<{ty}>(")?;
                print_args(f, args)?;
                f.write_str(")")
            }
        }
    }
}

fn print_args(f: &mut fmt::Formatter<'_>, args: &[ImlExpr]) -> fmt::Result {
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{arg}")?;
    }
    Ok(())
}

/// An IML statement.
#[derive(Debug, Clone, PartialEq)]
pub enum ImlStmt {
    Local {
        id: String,
        ty: Option<ImlType>,
        init: Option<ImlExpr>,
    },
    Assign {
        target: ImlExpr,
        value: ImlExpr,
    },
    Expr(ImlExpr),
    If {
        cond: ImlExpr,
        then: ImlBlock,
        alt: Option<ImlBlock>,
    },
    While {
        cond: ImlExpr,
        body: ImlBlock,
    },
    For {
        var: String,
        sequence: ImlExpr,
        body: ImlBlock,
    },
    Break,
    Continue,
    Return(Option<ImlExpr>),
    Throw {
        kind: String,
        message: ImlExpr,
    },
    Try {
        body: ImlBlock,
        catches: Vec<ImlCatch>,
    },
    Assert {
        cond: ImlExpr,
        message: Option<ImlExpr>,
    },
    Yield,
    Comment(String),
}

/// One catch clause; no parameter means the default catch.
#[derive(Debug, Clone, PartialEq)]
pub struct ImlCatch {
    pub param: Option<(String, ImlType)>,
    pub body: ImlBlock,
}

/// A statement block.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ImlBlock {
    pub stmts: Vec<ImlStmt>,
}

impl ImlBlock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, stmt: ImlStmt) {
        self.stmts.push(stmt);
    }

    pub fn is_empty(&self) -> bool {
        self.stmts.is_empty()
    }

    fn print(&self, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
        writeln!(f, "{{")?;
        for stmt in &self.stmts {
            print_stmt(f, stmt, indent + 1)?;
        }
        write!(f, "{}}}", "    ".repeat(indent))
    }
}

fn print_stmt(f: &mut fmt::Formatter<'_>, stmt: &ImlStmt, indent: usize) -> fmt::Result {
    let pad = "    ".repeat(indent);
    match stmt {
        ImlStmt::Local { id, ty, init } => {
            write!(f, "{pad}local {id}")?;
            if let Some(ty) = ty {
                write!(f, ": {ty}")?;
            }
            if let Some(init) = init {
                write!(f, " = {init}")?;
            }
            writeln!(f, ";")
        }
        ImlStmt::Assign { target, value } => writeln!(f, "{pad}{target} = {value};"),
        ImlStmt::Expr(expr) => writeln!(f, "{pad}{expr};"),
        ImlStmt::If { cond, then, alt } => {
            write!(f, "{pad}if ( {cond} ) ")?;
            then.print(f, indent)?;
            if let Some(alt) = alt {
                write!(f, " else ")?;
                alt.print(f, indent)?;
            }
            writeln!(f)
        }
        ImlStmt::While { cond, body } => {
            write!(f, "{pad}while ( {cond} ) ")?;
            body.print(f, indent)?;
            writeln!(f)
        }
        ImlStmt::For { var, sequence, body } => {
            write!(f, "{pad}for ( {var} in {sequence} ) ")?;
            body.print(f, indent)?;
            writeln!(f)
        }
        ImlStmt::Break => writeln!(f, "{pad}break;"),
        ImlStmt::Continue => writeln!(f, "{pad}continue;"),
        ImlStmt::Return(None) => writeln!(f, "{pad}return;"),
        ImlStmt::Return(Some(expr)) => writeln!(f, "{pad}return {expr};"),
        ImlStmt::Throw { kind, message } => writeln!(f, "{pad}throw {kind}({message});"),
        ImlStmt::Try { body, catches } => {
            write!(f, "{pad}try ")?;
            body.print(f, indent)?;
            for catch in catches {
                match &catch.param {
                    Some((id, ty)) => write!(f, " catch ( {id}: {ty} ) ")?,
                    None => write!(f, " catch ")?,
                }
                catch.body.print(f, indent)?;
            }
            writeln!(f)
        }
        ImlStmt::Assert { cond, message } => match message {
            Some(message) => writeln!(f, "{pad}assert {cond} : {message};"),
            None => writeln!(f, "{pad}assert {cond};"),
        },
        ImlStmt::Yield => writeln!(f, "{pad}yield;"),
        ImlStmt::Comment(text) => writeln!(f, "{pad}# {text}"),
    }
}

/// One function parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ImlParam {
    pub id: String,
    pub ty: ImlType,
}

/// An IML function.
#[derive(Debug, Clone, PartialEq)]
pub struct ImlFunction {
    pub id: String,
    pub params: Vec<ImlParam>,
    pub result: ImlType,
    pub body: ImlBlock,
    pub public: bool,
}

impl fmt::Display for ImlFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.public {
            f.write_str("public ")?;
        }
        write!(f, "function {}(", self.id)?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}: {}", param.id, param.ty)?;
        }
        write!(f, ") : {} ", self.result)?;
        self.body.print(f, 0)?;
        writeln!(f)
    }
}

/// A module-level declaration.
#[derive(Debug, Clone, PartialEq)]
pub enum ImlDecl {
    Function(ImlFunction),
    Constant { id: String, value: ImlExpr },
    Global { id: String, ty: ImlType, init: Option<ImlExpr> },
    Type { id: String, definition: String },
}

/// An emitted IML module.
#[derive(Debug, Clone, PartialEq)]
pub struct ImlModule {
    pub id: String,
    pub decls: Vec<ImlDecl>,
}

impl ImlModule {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            decls: Vec::new(),
        }
    }
}

impl fmt::Display for ImlModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "module {};", self.id)?;
        writeln!(f)?;
        for decl in &self.decls {
            match decl {
                ImlDecl::Function(function) => writeln!(f, "{function}")?,
                ImlDecl::Constant { id, value } => writeln!(f, "const {id} = {value};")?,
                ImlDecl::Global { id, ty, init } => match init {
                    Some(init) => writeln!(f, "global {id}: {ty} = {init};")?,
                    None => writeln!(f, "global {id}: {ty};")?,
                },
                ImlDecl::Type { id, definition } => writeln!(f, "type {id} = {definition};")?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prints_function_with_nested_control_flow() {
        let mut body = ImlBlock::new();
        body.push(ImlStmt::Local {
            id: "n".into(),
            ty: Some(ImlType::UInt(64)),
            init: Some(ImlExpr::uint(0)),
        });
        let mut then = ImlBlock::new();
        then.push(ImlStmt::Return(Some(ImlExpr::name("n"))));
        body.push(ImlStmt::If {
            cond: ImlExpr::binary(">", ImlExpr::name("n"), ImlExpr::uint(2)),
            then,
            alt: None,
        });
        let function = ImlFunction {
            id: "f".into(),
            params: vec![ImlParam {
                id: "data".into(),
                ty: ImlType::Ref(Box::new(ImlType::Stream)),
            }],
            result: ImlType::UInt(64),
            body,
            public: false,
        };
        let text = function.to_string();
        assert!(text.contains("function f(data: strong_ref<stream>) : uint64 {"));
        assert!(text.contains("local n: uint64 = 0;"));
        assert!(text.contains("if ( (n > 2) ) {"));
    }

    #[test]
    fn bytes_literals_escape_non_printable() {
        let expr = ImlExpr::BytesLit(vec![b'H', b'I', 0]);
        assert_eq!(expr.to_string(), "b\"HI\\x00\"");
    }

    #[test]
    fn unpack_prints_with_type_argument() {
        let expr = ImlExpr::Unpack {
            ty: ImlType::UInt(16),
            args: vec![ImlExpr::name("cur"), ImlExpr::name("ByteOrder::Big")],
        };
        assert_eq!(expr.to_string(), "unpack<uint16>(cur, ByteOrder::Big)");
    }
}
