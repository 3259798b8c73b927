//! Compiler front-end for gflow, a small language describing dataflow
//! pipelines.
//!
//! A gflow program defines constants and inline functions; `main` is
//! expanded into a flat graph of operator invocations that a downstream
//! executor runs:
//!
//! ```gflow
//! @prefix = "demo_cache";
//!
//! inline func lookup(key) {
//!     builtin("lookup_cache", key, prefix=@prefix);
//! }
//!
//! func main(input) {
//!     key=builtin("jq", input, filter='.key');
//!     cached=@call(lookup, [key]);
//!     cached;
//! }
//! ```
//!
//! Compilation is a straight line: source text is scanned by the [`lexer`],
//! parsed into a statement tree by the [`parser`], and lowered by the
//! [`generator`] into a [`graph::Graph`] whose JSON form is the contract
//! with the executor. Nothing here runs the pipeline.

pub mod ast;
pub mod generator;
pub mod graph;
pub mod lexer;
pub mod parser;
pub mod span;

use std::path::{Path, PathBuf};

use miette::{Diagnostic, NamedSource};
use thiserror::Error;

use crate::graph::Graph;
use crate::span::Span;

/// An error encountered while compiling gflow source.
///
/// Scanner and parser errors carry a span into the source and render with
/// the offending line. Generator errors happen after spans are gone; they
/// quote the statement being lowered instead.
#[derive(Debug, Error, Diagnostic)]
pub enum CompileError {
    /// The scanner produced input it could not understand.
    #[error("{message}")]
    #[diagnostic(code(gflow::parse::illegal_token))]
    IllegalToken {
        /// What the scanner objected to
        message: &'static str,
        /// Where the offending input starts
        #[label("this is not valid gflow")]
        location: Span,
    },

    /// The parser encountered something different from what it expected.
    #[error("expected {expected}")]
    #[diagnostic(code(gflow::parse::unexpected_token))]
    UnexpectedToken {
        /// The token that was expected
        expected: String,
        /// The token that was encountered instead
        got: String,
        /// The location of the offending token
        #[label("got {got}")]
        location: Span,
    },

    /// The input ended in the middle of a function body.
    #[error("unexpected end of file inside a body")]
    #[diagnostic(code(gflow::parse::unexpected_eof))]
    UnexpectedEof {
        /// The end of the input
        #[label("expected `}}` by here")]
        location: Span,
    },

    /// No `main` function was defined.
    #[error("main function not found")]
    #[diagnostic(code(gflow::generate::main_not_found))]
    MainNotFound,

    /// `main` was defined with the wrong number of parameters.
    #[error("main function should have only one input")]
    #[diagnostic(code(gflow::generate::main_arity))]
    MainArity,

    /// An inline call's input count does not match the definition.
    #[error("input length mismatch calling `{name}`: it takes {expected} inputs, got {got}")]
    #[diagnostic(code(gflow::generate::input_length_mismatch))]
    InputLengthMismatch {
        /// The function being called
        name: String,
        /// How many parameters the definition has
        expected: usize,
        /// How many inputs the call passed
        got: usize,
    },

    /// An inline call names a function that is not in scope.
    #[error("inline function not found: `{name}`\ncurrent statement: {stmt}")]
    #[diagnostic(code(gflow::generate::function_not_found))]
    FunctionNotFound {
        /// The name that failed to resolve
        name: String,
        /// The statement being lowered
        stmt: String,
    },

    /// An input names something that is not a previously emitted node.
    #[error("undefined node variable `{name}`\ncurrent statement: {stmt}")]
    #[diagnostic(code(gflow::generate::undefined_node))]
    UndefinedNode {
        /// The name that failed to resolve
        name: String,
        /// The statement being lowered
        stmt: String,
    },

    /// A constant reference did not resolve to a literal string.
    #[error("const string not found: `{name}`\ncurrent statement: {stmt}")]
    #[diagnostic(code(gflow::generate::const_not_found))]
    ConstNotFound {
        /// The name that failed to resolve
        name: String,
        /// The statement being lowered
        stmt: String,
    },

    /// An inline function with an empty body was called.
    #[error("empty function body: `{name}`")]
    #[diagnostic(code(gflow::generate::empty_function_body))]
    EmptyFunctionBody {
        /// The function being called
        name: String,
    },

    /// An `if` statement with an empty `then` arm was lowered.
    #[error("if statement should have at least one true statement\ncurrent statement: {stmt}")]
    #[diagnostic(code(gflow::generate::empty_then_branch))]
    EmptyThenBranch {
        /// The statement being lowered
        stmt: String,
    },

    /// A statement kind that cannot appear where it did.
    #[error("unknown statement type\ncurrent statement: {stmt}")]
    #[diagnostic(code(gflow::generate::unknown_statement))]
    UnknownStatement {
        /// The statement being lowered
        stmt: String,
    },
}

/// An error produced by gflowc
#[derive(Debug, Error, Diagnostic)]
pub enum GflowcError {
    /// We failed to read the source file.
    #[error("failed to read {}", file.display())]
    FileReading {
        /// The file we tried to read
        file: PathBuf,
        /// The underlying IO error
        #[source]
        inner: std::io::Error,
    },

    /// We failed to write the output file.
    #[error("failed to write {}", file.display())]
    FileWriting {
        /// The file we tried to write
        file: PathBuf,
        /// The underlying IO error
        #[source]
        inner: std::io::Error,
    },

    /// The source failed to compile.
    #[error("Compile Error")]
    Compile {
        /// The source code that produced the compile error
        #[source_code]
        source_code: NamedSource<String>,
        /// The compile error
        #[related]
        errors: Vec<CompileError>,
    },

    /// Serializing the graph failed.
    #[error("failed to serialize the graph")]
    Serialize(#[from] serde_json::Error),
}

/// Parse the given source into its statement tree.
pub fn parse(code: &str) -> Result<Vec<ast::Statement<'_>>, CompileError> {
    parser::Parser::new(code).parse()
}

/// Compile the given source into a dataflow graph.
pub fn compile(code: &str) -> Result<Graph, CompileError> {
    let statements = parse(code)?;
    log::debug!("parsed {} top-level statements", statements.len());
    let graph = generator::generate(&statements)?;
    log::debug!("lowered program into {} nodes", graph.len());
    Ok(graph)
}

/// Read and compile a gflow source file.
pub fn compile_file(file: &Path) -> Result<Graph, GflowcError> {
    let code = std::fs::read_to_string(file).map_err(|io_error| GflowcError::FileReading {
        file: file.to_owned(),
        inner: io_error,
    })?;

    compile(&code).map_err(|error| GflowcError::Compile {
        source_code: NamedSource::new(file.to_string_lossy(), code),
        errors: vec![error],
    })
}
