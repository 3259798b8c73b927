//! Lowers the statement tree into a dataflow graph.
//!
//! The walk threads a flat scope of name bindings through the statements.
//! Inline calls expand their function body at the call site with a copied
//! scope; `if`/`else` lowers into `when_true` / `when_false` gate nodes,
//! with the arm statements depending on their gate, and a `when_any` merge
//! when both arms exist.

use std::collections::HashMap;
use std::fmt;

use smallvec::SmallVec;

use crate::CompileError;
use crate::ast::{ArgPair, CallKind, FuncCall, FuncDef, IfStmt, NodeAssign, NodeExp, Statement, StrVal};
use crate::graph::{Graph, Node, NodeId};

/// What an identifier currently resolves to during lowering.
#[derive(Clone, Copy)]
enum ScopeItem<'a, 'src> {
    /// A previously emitted node.
    Node(NodeId),
    /// A named compile-time string.
    Const(StrVal<'src>),
    /// An inline function definition.
    Func(&'a FuncDef<'src>),
}

/// A flat lexical scope.
///
/// gflow has no closures, so a scope is a plain value: entering an inline
/// expansion or a `then` arm copies the whole map, and bindings made in the
/// copy never reach the original.
#[derive(Clone, Default)]
struct Scope<'a, 'src> {
    items: HashMap<&'src str, ScopeItem<'a, 'src>>,
}

impl<'a, 'src> Scope<'a, 'src> {
    fn insert(&mut self, name: &'src str, item: ScopeItem<'a, 'src>) {
        self.items.insert(name, item);
    }

    fn get(&self, name: &str) -> Option<ScopeItem<'a, 'src>> {
        self.items.get(name).copied()
    }

    /// Look up an identifier that must name a previously emitted node.
    ///
    /// `context` is the statement being lowered, quoted in the error.
    fn node(&self, name: &str, context: &dyn fmt::Display) -> Result<NodeId, CompileError> {
        match self.get(name) {
            Some(ScopeItem::Node(id)) => Ok(id),
            _ => Err(CompileError::UndefinedNode {
                name: name.to_owned(),
                stmt: context.to_string(),
            }),
        }
    }

    /// Look up a constant reference that must name a literal string.
    fn literal(&self, name: &str, context: &dyn fmt::Display) -> Result<&'src str, CompileError> {
        match self.get(name) {
            Some(ScopeItem::Const(StrVal::Literal(text))) => Ok(text),
            _ => Err(CompileError::ConstNotFound {
                name: name.to_owned(),
                stmt: context.to_string(),
            }),
        }
    }

    /// Look up an inline function definition.
    fn function(
        &self,
        name: &str,
        context: &dyn fmt::Display,
    ) -> Result<&'a FuncDef<'src>, CompileError> {
        match self.get(name) {
            Some(ScopeItem::Func(def)) => Ok(def),
            _ => Err(CompileError::FunctionNotFound {
                name: name.to_owned(),
                stmt: context.to_string(),
            }),
        }
    }
}

/// Lower a parsed program into its dataflow graph.
pub fn generate(statements: &[Statement<'_>]) -> Result<Graph, CompileError> {
    Generator::default().run(statements)
}

/// Holds the graph being built.
#[derive(Default)]
struct Generator {
    graph: Graph,
}

impl Generator {
    /// Walk the top level, then expand `main` against the start node.
    fn run<'a, 'src>(
        mut self,
        statements: &'a [Statement<'src>],
    ) -> Result<Graph, CompileError> {
        self.graph.push(Node::start());

        let mut scope = Scope::default();
        for statement in statements {
            match statement {
                Statement::Const(decl) => scope.insert(decl.name, ScopeItem::Const(decl.value)),
                Statement::FuncDef(def) => scope.insert(def.name, ScopeItem::Func(def)),
                Statement::Call(call) => {
                    self.lower_call(call, &scope, &[])?;
                }
                Statement::NodeAssign(assign) => {
                    self.lower_node_assign(assign, &mut scope, &[])?;
                }
                Statement::If(branch) => {
                    self.lower_if(branch, &mut scope, &[])?;
                }
                Statement::Comment(_) => {}
                Statement::NodeVal { .. } => {
                    return Err(CompileError::UnknownStatement {
                        stmt: statement.to_string(),
                    });
                }
            }
        }

        let main = match scope.get("main") {
            Some(ScopeItem::Func(def)) => def,
            _ => return Err(CompileError::MainNotFound),
        };
        let &[entry_param] = main.params.as_slice() else {
            return Err(CompileError::MainArity);
        };

        // The runtime input reaches the pipeline by binding main's single
        // parameter to the start node.
        scope.insert(entry_param, ScopeItem::Node(NodeId::START));
        let entry_call = FuncCall {
            kind: CallKind::Inline,
            name: main.name,
            inputs: vec![NodeExp::Var(entry_param)],
            args: Vec::new(),
        };
        self.lower_inline_call(&entry_call, &scope, &[])?;

        Ok(self.graph)
    }

    /// Lower a single body statement, returning the emitted node if one was
    /// produced (comments produce none).
    fn lower_statement<'a, 'src>(
        &mut self,
        statement: &'a Statement<'src>,
        scope: &mut Scope<'a, 'src>,
        dependencies: &[NodeId],
    ) -> Result<Option<NodeId>, CompileError> {
        match statement {
            Statement::NodeVal { name } => {
                let passthrough = FuncCall {
                    kind: CallKind::Builtin,
                    name: "identity",
                    inputs: vec![NodeExp::Var(*name)],
                    args: Vec::new(),
                };
                Ok(Some(self.lower_call(&passthrough, scope, dependencies)?))
            }
            Statement::Call(call) => Ok(Some(self.lower_call(call, scope, dependencies)?)),
            Statement::NodeAssign(assign) => {
                Ok(Some(self.lower_node_assign(assign, scope, dependencies)?))
            }
            Statement::If(branch) => Ok(Some(self.lower_if(branch, scope, dependencies)?)),
            Statement::Comment(_) => Ok(None),
            Statement::Const(_) | Statement::FuncDef(_) => Err(CompileError::UnknownStatement {
                stmt: statement.to_string(),
            }),
        }
    }

    /// Emit the node for a builtin or model call; inline calls expand their
    /// body instead. Returns the index of the call's resulting node.
    fn lower_call<'a, 'src>(
        &mut self,
        call: &FuncCall<'src>,
        scope: &Scope<'a, 'src>,
        dependencies: &[NodeId],
    ) -> Result<NodeId, CompileError> {
        let namespace = match call.kind {
            CallKind::Builtin => "builtin",
            CallKind::Model => "model",
            CallKind::Inline => return self.lower_inline_call(call, scope, dependencies),
        };

        let mut node = Node::new(format!("{namespace}.{}", call.name));
        node.dependencies = SmallVec::from_slice(dependencies);
        for input in &call.inputs {
            let input_id = self.resolve_node_exp(input, scope, dependencies, call)?;
            node.inputs.push(input_id);
        }
        for ArgPair { name, value } in &call.args {
            let text = self.resolve_str_val(*value, scope, call)?;
            node.args
                .entry((*name).to_owned())
                .or_default()
                .push(text.to_owned());
        }

        Ok(self.graph.push(node))
    }

    /// Expand an inline function call by lowering its body with a copied
    /// scope; the call's inputs bind the parameters. Returns the index of
    /// the last node the body emitted.
    fn lower_inline_call<'a, 'src>(
        &mut self,
        call: &FuncCall<'src>,
        scope: &Scope<'a, 'src>,
        dependencies: &[NodeId],
    ) -> Result<NodeId, CompileError> {
        let def = scope.function(call.name, call)?;
        if def.params.len() != call.inputs.len() {
            return Err(CompileError::InputLengthMismatch {
                name: call.name.to_owned(),
                expected: def.params.len(),
                got: call.inputs.len(),
            });
        }

        let mut inner = scope.clone();
        for (&param, input) in def.params.iter().zip(&call.inputs) {
            let input_id = self.resolve_node_exp(input, scope, dependencies, call)?;
            inner.insert(param, ScopeItem::Node(input_id));
        }

        if def.body.is_empty() {
            return Err(CompileError::EmptyFunctionBody {
                name: call.name.to_owned(),
            });
        }

        log::debug!("expanding inline function `{}`", call.name);
        let mut last = NodeId::START;
        for statement in &def.body {
            if let Some(id) = self.lower_statement(statement, &mut inner, dependencies)? {
                last = id;
            }
        }
        Ok(last)
    }

    /// Lower the embedded call and bind its node to the variable in the
    /// current scope.
    fn lower_node_assign<'a, 'src>(
        &mut self,
        assign: &'a NodeAssign<'src>,
        scope: &mut Scope<'a, 'src>,
        dependencies: &[NodeId],
    ) -> Result<NodeId, CompileError> {
        let id = self.lower_call(&assign.call, scope, dependencies)?;
        scope.insert(assign.name, ScopeItem::Node(id));
        Ok(id)
    }

    /// Lower `if`/`else` into gate nodes.
    ///
    /// Each arm's statements depend on their gate rather than consuming it,
    /// so their data inputs still point at the true upstream nodes. With an
    /// `else`, a `when_any` merges the two arm endpoints and is the value
    /// of the whole statement; without one, the `then` endpoint is.
    fn lower_if<'a, 'src>(
        &mut self,
        branch: &'a IfStmt<'src>,
        scope: &mut Scope<'a, 'src>,
        dependencies: &[NodeId],
    ) -> Result<NodeId, CompileError> {
        let cond = self.resolve_node_exp(&branch.cond, scope, dependencies, branch)?;

        if branch.then_body.is_empty() {
            return Err(CompileError::EmptyThenBranch {
                stmt: branch.to_string(),
            });
        }

        let mut gate = Node::new("builtin.when_true".to_owned());
        gate.inputs.push(cond);
        let true_gate = self.graph.push(gate);

        let mut then_scope = scope.clone();
        let mut then_end = NodeId::START;
        for statement in &branch.then_body {
            if let Some(id) = self.lower_statement(statement, &mut then_scope, &[true_gate])? {
                then_end = id;
            }
        }

        if branch.else_body.is_empty() {
            return Ok(then_end);
        }

        let mut gate = Node::new("builtin.when_false".to_owned());
        gate.inputs.push(cond);
        let false_gate = self.graph.push(gate);

        // The else arm runs in the outer scope: bindings it makes stay
        // visible after the branch.
        let mut else_end = NodeId::START;
        for statement in &branch.else_body {
            if let Some(id) = self.lower_statement(statement, scope, &[false_gate])? {
                else_end = id;
            }
        }

        let mut merge = Node::new("builtin.when_any".to_owned());
        merge.inputs.push(then_end);
        merge.inputs.push(else_end);
        Ok(self.graph.push(merge))
    }

    /// Resolve an input expression to the index of an emitted node: either
    /// a scope lookup or, for a nested call, lowering the call itself.
    fn resolve_node_exp<'a, 'src>(
        &mut self,
        input: &'a NodeExp<'src>,
        scope: &Scope<'a, 'src>,
        dependencies: &[NodeId],
        context: &dyn fmt::Display,
    ) -> Result<NodeId, CompileError> {
        match input {
            NodeExp::Var(name) => scope.node(name, context),
            NodeExp::Call(call) => self.lower_call(call, scope, dependencies),
        }
    }

    /// Resolve a string value, following a constant reference to its
    /// literal.
    fn resolve_str_val<'a, 'src>(
        &self,
        value: StrVal<'src>,
        scope: &Scope<'a, 'src>,
        context: &dyn fmt::Display,
    ) -> Result<&'src str, CompileError> {
        match value {
            StrVal::Literal(text) => Ok(text),
            StrVal::ConstRef(name) => scope.literal(name, context),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::parser::Parser;

    fn compile(code: &str) -> Graph {
        let statements = Parser::new(code).parse().expect("parse failed");
        generate(&statements).expect("generate failed")
    }

    fn compile_error(code: &str) -> CompileError {
        let statements = Parser::new(code).parse().expect("parse failed");
        generate(&statements).expect_err("generate should fail")
    }

    #[track_caller]
    fn assert_graph_invariants(graph: &Graph) {
        let first = graph.nodes.first().expect("graph has a start node");
        assert_eq!(first.kind, "builtin.start");
        assert_eq!(first.in_degree, 0);
        assert!(first.inputs.is_empty());
        assert!(first.dependencies.is_empty());

        for (index, node) in graph.nodes.iter().enumerate() {
            for NodeId(input) in &node.inputs {
                assert!(*input < index, "node {index} has forward input {input}");
            }
            for NodeId(dependency) in &node.dependencies {
                assert!(
                    *dependency < index,
                    "node {index} has forward dependency {dependency}",
                );
            }
            let expected = if node.dependencies.is_empty() {
                node.inputs.len()
            } else {
                node.dependencies.len()
            };
            assert_eq!(node.in_degree, expected, "node {index} in-degree");
        }
    }

    #[track_caller]
    fn assert_graph_json(code: &str, expected: serde_json::Value) {
        let graph = compile(code);
        assert_graph_invariants(&graph);
        assert_eq!(
            serde_json::to_value(&graph).expect("graph serializes"),
            expected,
        );
    }

    #[test]
    fn generates_builtin_identity() {
        assert_graph_json(
            r#"func main(input) {builtin("identity", [input]);}"#,
            json!({
                "nodes": [
                    {"type": "builtin.start", "in_degree": 0},
                    {"type": "builtin.identity", "inputs": [0], "in_degree": 1},
                ],
            }),
        );
    }

    #[test]
    fn generates_inline_expansion() {
        let code = r#"
        inline func setCache(key, result) {
            cacheReq=builtin("jq",[key,result],filter='{"key": .[0], "payload": .[1], "ttl": 259200000}');
            builtin("set_cache", cacheReq, prefix='rec_cache_v1');
        }
        func main(input) {
            result=builtin("jq",input,filter='{"key": .key, "payload": .payload}');
            @call(setCache, [input, result]);
        }"#;
        assert_graph_json(
            code,
            json!({
                "nodes": [
                    {"type": "builtin.start", "in_degree": 0},
                    {
                        "type": "builtin.jq",
                        "args": {"filter": ["{\"key\": .key, \"payload\": .payload}"]},
                        "in_degree": 1,
                        "inputs": [0],
                    },
                    {
                        "type": "builtin.jq",
                        "args": {"filter": ["{\"key\": .[0], \"payload\": .[1], \"ttl\": 259200000}"]},
                        "in_degree": 2,
                        "inputs": [0, 1],
                    },
                    {
                        "type": "builtin.set_cache",
                        "args": {"prefix": ["rec_cache_v1"]},
                        "in_degree": 1,
                        "inputs": [2],
                    },
                ],
            }),
        );
    }

    #[test_log::test]
    fn generates_full_graph_with_branching() {
        let code = r#"
        inline func getCacheKey(input) {
            builtin("jq",input,filter='.query');
        }

        inline func setCache(key, result) {
            cacheReq=builtin("jq",[key,result],filter='{"key": .[0], "payload": .[1], "ttl": 259200000}');
            builtin("set_cache", cacheReq, prefix='rec_cache_v1');
        }

        inline func lookupCache(key){
            builtin("lookup_cache", key, prefix='rec_cache_v1');
        }

        func main(input) {
            input = builtin("jq", input, filter='.payload | fromjson');
            key=@call(getCacheKey, [input]);
            cacheRes=@call(lookupCache,[key]);
            result=builtin("http", input, endpoint='http://suggestion.internal/suggestion/',
                method='post', max_retry_times="3", default_value='{"actions":[]}', timeout="800ms");
            @call(setCache, [key, result]);
            cacheMiss=builtin("jq", cacheRes, filter='.found | not');
            if(cacheMiss){
                result;
            }else{
                builtin("jq", cacheRes, filter='.payload');
            }
        }"#;
        assert_graph_json(
            code,
            json!({
                "nodes": [
                    {"type": "builtin.start", "in_degree": 0},
                    {
                        "type": "builtin.jq",
                        "args": {"filter": [".payload | fromjson"]},
                        "in_degree": 1,
                        "inputs": [0],
                    },
                    {
                        "type": "builtin.jq",
                        "args": {"filter": [".query"]},
                        "in_degree": 1,
                        "inputs": [1],
                    },
                    {
                        "type": "builtin.lookup_cache",
                        "args": {"prefix": ["rec_cache_v1"]},
                        "in_degree": 1,
                        "inputs": [2],
                    },
                    {
                        "type": "builtin.http",
                        "args": {
                            "endpoint": ["http://suggestion.internal/suggestion/"],
                            "method": ["post"],
                            "max_retry_times": ["3"],
                            "default_value": ["{\"actions\":[]}"],
                            "timeout": ["800ms"],
                        },
                        "in_degree": 1,
                        "inputs": [1],
                    },
                    {
                        "type": "builtin.jq",
                        "args": {"filter": ["{\"key\": .[0], \"payload\": .[1], \"ttl\": 259200000}"]},
                        "in_degree": 2,
                        "inputs": [2, 4],
                    },
                    {
                        "type": "builtin.set_cache",
                        "args": {"prefix": ["rec_cache_v1"]},
                        "in_degree": 1,
                        "inputs": [5],
                    },
                    {
                        "type": "builtin.jq",
                        "args": {"filter": [".found | not"]},
                        "in_degree": 1,
                        "inputs": [3],
                    },
                    {"type": "builtin.when_true", "in_degree": 1, "inputs": [7]},
                    {
                        "type": "builtin.identity",
                        "in_degree": 1,
                        "inputs": [4],
                        "dependencies": [8],
                    },
                    {"type": "builtin.when_false", "in_degree": 1, "inputs": [7]},
                    {
                        "type": "builtin.jq",
                        "args": {"filter": [".payload"]},
                        "in_degree": 1,
                        "inputs": [3],
                        "dependencies": [10],
                    },
                    {"type": "builtin.when_any", "in_degree": 2, "inputs": [9, 11]},
                ],
            }),
        );
    }

    #[test]
    fn resolves_constant_references() {
        assert_graph_json(
            r#"@k = "x"; func main(input) { builtin("f", [input], p=@k); }"#,
            json!({
                "nodes": [
                    {"type": "builtin.start", "in_degree": 0},
                    {
                        "type": "builtin.f",
                        "args": {"p": ["x"]},
                        "in_degree": 1,
                        "inputs": [0],
                    },
                ],
            }),
        );
    }

    #[test]
    fn if_without_else_emits_only_the_true_gate() {
        let code = r#"
        func main(input) {
            flag=builtin("jq", input, filter='.found');
            if(flag){
                builtin("jq", input, filter='.payload');
            }
        }"#;
        let graph = compile(code);
        assert_graph_invariants(&graph);

        let kinds: Vec<&str> = graph.nodes.iter().map(|node| node.kind.as_str()).collect();
        assert_eq!(
            kinds,
            vec![
                "builtin.start",
                "builtin.jq",
                "builtin.when_true",
                "builtin.jq",
            ],
        );
        assert_eq!(graph.nodes[2].inputs.as_slice(), &[NodeId(1)]);
        assert_eq!(graph.nodes[3].dependencies.as_slice(), &[NodeId(2)]);
    }

    #[test]
    fn call_condition_is_lowered_before_the_gates() {
        let code = r#"
        func main(input) {
            if(builtin("jq", input, filter='.found');){
                input;
            }
        }"#;
        let graph = compile(code);
        assert_graph_invariants(&graph);

        assert_eq!(graph.nodes[1].kind, "builtin.jq");
        assert_eq!(graph.nodes[2].kind, "builtin.when_true");
        assert_eq!(graph.nodes[2].inputs.as_slice(), &[NodeId(1)]);
    }

    #[test]
    fn else_arm_bindings_leak_into_the_outer_scope() {
        let code = r#"
        func main(input) {
            cond=builtin("check", input);
            if(cond){
                builtin("a", input);
            }else{
                x=builtin("b", input);
            }
            x;
        }"#;
        let graph = compile(code);
        assert_graph_invariants(&graph);

        // The final bare `x;` resolves to the node assigned inside `else`.
        let last = graph.nodes.last().expect("graph is non-empty");
        assert_eq!(last.kind, "builtin.identity");
        assert_eq!(last.inputs.as_slice(), &[NodeId(5)]);
        assert_eq!(graph.nodes[5].kind, "builtin.b");
    }

    #[test]
    fn then_arm_bindings_stay_local() {
        let code = r#"
        func main(input) {
            cond=builtin("check", input);
            if(cond){
                x=builtin("a", input);
            }else{
                builtin("b", input);
            }
            x;
        }"#;
        let error = compile_error(code);
        assert!(
            matches!(&error, CompileError::UndefinedNode { name, .. } if name == "x"),
            "got {error:?}",
        );
    }

    #[test]
    fn missing_main_is_fatal() {
        let error = compile_error(r#"inline func helper(input) { input; }"#);
        assert!(error.to_string().contains("main function not found"));
    }

    #[test]
    fn main_with_two_params_is_fatal() {
        let error = compile_error(r#"func main(a, b) { a; }"#);
        assert!(
            error
                .to_string()
                .contains("main function should have only one input"),
        );
    }

    #[test]
    fn inline_arity_mismatch_is_fatal() {
        let code = r#"
        inline func f(a, b) { builtin("jq", [a, b]); }
        func main(input) { @call(f, [input]); }"#;
        let error = compile_error(code);
        assert!(error.to_string().contains("input length mismatch"));
    }

    #[test]
    fn unknown_inline_function_is_fatal() {
        let error = compile_error(r#"func main(input) { @call(nope, [input]); }"#);
        assert!(error.to_string().contains("inline function not found"));
    }

    #[test]
    fn undefined_constant_is_fatal() {
        let error = compile_error(r#"func main(input) { builtin("f", input, p=@missing); }"#);
        assert!(error.to_string().contains("const string not found"));
    }

    #[test]
    fn constant_chain_does_not_resolve() {
        // A constant referencing another constant is stored unresolved and
        // cannot be used as an argument value.
        let code = r#"
        @a = "x";
        @b = @a;
        func main(input) { builtin("f", input, p=@b); }"#;
        let error = compile_error(code);
        assert!(error.to_string().contains("const string not found"));
    }

    #[test]
    fn empty_inline_body_is_fatal() {
        let code = r#"
        inline func empty(a) {}
        func main(input) { @call(empty, [input]); }"#;
        let error = compile_error(code);
        assert!(error.to_string().contains("empty function body"));
    }

    #[test]
    fn empty_then_body_is_fatal() {
        let error = compile_error(r#"func main(input) { if(input){} }"#);
        assert!(
            error
                .to_string()
                .contains("if statement should have at least one true statement"),
        );
    }

    #[test]
    fn undefined_input_variable_is_fatal() {
        let error = compile_error(r#"func main(input) { builtin("f", [nope]); }"#);
        assert!(
            matches!(&error, CompileError::UndefinedNode { name, .. } if name == "nope"),
            "got {error:?}",
        );
    }

    fn arb_program() -> impl proptest::strategy::Strategy<Value = String> {
        use proptest::prelude::*;

        (1usize..5, any::<bool>(), any::<bool>()).prop_map(
            |(chain_length, with_branch, with_else)| {
                let mut body = String::from("  step0=builtin(\"jq\", input, filter='.');\n");
                for index in 1..chain_length {
                    let previous = index - 1;
                    body.push_str(&format!(
                        "  step{index}=builtin(\"jq\", step{previous}, filter='.');\n",
                    ));
                }
                let last = chain_length - 1;
                if with_branch {
                    body.push_str(&format!(
                        "  flag=builtin(\"jq\", step{last}, filter='.found');\n",
                    ));
                    if with_else {
                        body.push_str(&format!(
                            "  if(flag){{ step{last}; }}else{{ builtin(\"jq\", step{last}, filter='.miss'); }}\n",
                        ));
                    } else {
                        body.push_str(&format!("  if(flag){{ step{last}; }}\n"));
                    }
                } else {
                    body.push_str(&format!("  step{last};\n"));
                }
                format!("func main(input) {{\n{body}}}\n")
            },
        )
    }

    proptest::proptest! {
        #[test]
        fn generated_graphs_uphold_the_invariants(code in arb_program()) {
            let graph = compile(&code);
            assert_graph_invariants(&graph);
        }
    }
}
