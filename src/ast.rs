//! The gflow statement tree produced by the parser.
//!
//! Everything here borrows the source text; the tree lives exactly as long
//! as one compilation and is consumed once by the generator.

use std::fmt;

/// Distinguishes the three callable forms of a [`FuncCall`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    /// A system operator, lowered to a `builtin.<name>` node.
    Builtin,
    /// A model operator, lowered to a `model.<name>` node.
    Model,
    /// A user-defined function, expanded at the call site.
    Inline,
}

impl fmt::Display for CallKind {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Builtin => fmt.write_str("builtin"),
            Self::Model => fmt.write_str("model"),
            Self::Inline => fmt.write_str("inline"),
        }
    }
}

/// A compile-time string: either a literal or a `@name` reference to a
/// previously defined constant, resolved at generation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrVal<'src> {
    /// The string itself, without delimiters.
    Literal(&'src str),
    /// The name of the constant holding the string.
    ConstRef(&'src str),
}

impl fmt::Display for StrVal<'_> {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(text) => write!(fmt, "{text:?}"),
            Self::ConstRef(name) => write!(fmt, "@{name}"),
        }
    }
}

/// A value in input position: a bound node variable or a nested call.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeExp<'src> {
    /// An identifier naming a previously emitted node.
    Var(&'src str),
    /// A call whose emitted node is the value. The parser only produces
    /// this for `if` conditions.
    Call(Box<FuncCall<'src>>),
}

impl fmt::Display for NodeExp<'_> {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Var(name) => fmt.write_str(name),
            Self::Call(call) => write!(fmt, "{call}"),
        }
    }
}

/// A `name=value` argument to a builtin or model call.
#[derive(Debug, Clone, PartialEq)]
pub struct ArgPair<'src> {
    /// The argument name.
    pub name: &'src str,
    /// The argument value.
    pub value: StrVal<'src>,
}

/// An invocation of a builtin operator, model operator or inline function.
#[derive(Debug, Clone, PartialEq)]
pub struct FuncCall<'src> {
    /// Which callable form this is.
    pub kind: CallKind,
    /// The operator or function name.
    pub name: &'src str,
    /// The node values consumed as inputs.
    pub inputs: Vec<NodeExp<'src>>,
    /// Named arguments, in source order.
    pub args: Vec<ArgPair<'src>>,
}

impl fmt::Display for FuncCall<'_> {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "[{}]{}([", self.kind, self.name)?;
        for (index, input) in self.inputs.iter().enumerate() {
            if index > 0 {
                fmt.write_str(", ")?;
            }
            write!(fmt, "{input}")?;
        }
        fmt.write_str("]")?;
        for ArgPair { name, value } in &self.args {
            write!(fmt, ", {name}={value}")?;
        }
        fmt.write_str(")")
    }
}

/// Binds an identifier to the node emitted for a call.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeAssign<'src> {
    /// The variable name.
    pub name: &'src str,
    /// The call whose emitted node the name binds to.
    pub call: FuncCall<'src>,
}

/// A top-level constant binding, `@name = "...";`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstAssign<'src> {
    /// The constant name.
    pub name: &'src str,
    /// The bound value.
    pub value: StrVal<'src>,
}

/// A function definition. All user-defined functions are expanded inline at
/// their call sites; the `inline` keyword is accepted but changes nothing.
#[derive(Debug, Clone, PartialEq)]
pub struct FuncDef<'src> {
    /// The function name.
    pub name: &'src str,
    /// Parameter names, in order.
    pub params: Vec<&'src str>,
    /// The body statements.
    pub body: Vec<Statement<'src>>,
}

/// Conditional branching over a node value.
#[derive(Debug, Clone, PartialEq)]
pub struct IfStmt<'src> {
    /// The condition node.
    pub cond: NodeExp<'src>,
    /// Statements gated on the condition being truthy. Never empty in a
    /// well-formed program.
    pub then_body: Vec<Statement<'src>>,
    /// Statements gated on the condition being falsy; empty when the `else`
    /// clause is absent.
    pub else_body: Vec<Statement<'src>>,
}

impl fmt::Display for IfStmt<'_> {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.else_body.is_empty() {
            write!(fmt, "if ({}) {{ ... }}", self.cond)
        } else {
            write!(fmt, "if ({}) {{ ... }} else {{ ... }}", self.cond)
        }
    }
}

/// A single surface construct.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement<'src> {
    /// `@name = "...";` — top level only.
    Const(ConstAssign<'src>),
    /// `[inline] func name(...) { ... }` — top level only.
    FuncDef(FuncDef<'src>),
    /// A call in statement position.
    Call(FuncCall<'src>),
    /// `name=<call>` inside a body.
    NodeAssign(NodeAssign<'src>),
    /// A bare `name;` inside a body, lowered as an identity pass-through.
    NodeVal {
        /// The node variable being passed through.
        name: &'src str,
    },
    /// `if (...) { ... } [else { ... }]`.
    If(IfStmt<'src>),
    /// A `//` comment, kept by the parser and dropped by the generator.
    Comment(&'src str),
}

impl fmt::Display for Statement<'_> {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Const(decl) => write!(fmt, "@{} = {};", decl.name, decl.value),
            Self::FuncDef(def) => {
                write!(fmt, "func {}({}) {{ ... }}", def.name, def.params.join(", "))
            }
            Self::Call(call) => write!(fmt, "{call};"),
            Self::NodeAssign(assign) => write!(fmt, "{}={};", assign.name, assign.call),
            Self::NodeVal { name } => write!(fmt, "{name};"),
            Self::If(branch) => write!(fmt, "{branch}"),
            Self::Comment(text) => fmt.write_str(text),
        }
    }
}
