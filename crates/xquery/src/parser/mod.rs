//! Recursive-descent parser: one method per grammar rule, building the AST bottom-up.
//!
//! Variable references are resolved while parsing. Every binding construct parses its binding
//! expression first, then opens a scope, declares its names and offers the scope to whatever
//! follows. References therefore carry the unique internal name of their declaration and
//! later stages never repeat lexical lookup.

mod scopes;
mod tokenizer;

pub use scopes::VarScopes;
pub use tokenizer::{Token, Tokenizer, is_name_char, is_name_start};

use crate::ast::{Ast, AstKind, NodeId};
use crate::error::Error;
use tracing::debug;

type ParseResult = Result<NodeId, Error>;

/// Parse a main or library module and return its AST (root kind `XQuery`).
pub fn parse(query: &str) -> Result<Ast, Error> {
    XQueryParser::new(query).parse()
}

const AXES: &[&str] = &[
    "child",
    "descendant",
    "attribute",
    "self",
    "descendant-or-self",
    "following-sibling",
    "following",
    "namespace",
    "parent",
    "ancestor",
    "preceding-sibling",
    "preceding",
    "ancestor-or-self",
];

const KIND_TESTS: &[(&str, AstKind)] = &[
    ("document-node", AstKind::DocumentType),
    ("element", AstKind::ElementType),
    ("attribute", AstKind::AttributeType),
    ("schema-element", AstKind::SchemaElementType),
    ("schema-attribute", AstKind::SchemaAttributeType),
    ("processing-instruction", AstKind::PIType),
    ("comment", AstKind::CommentType),
    ("text", AstKind::TextType),
    ("namespace-node", AstKind::NamespaceNodeType),
    ("node", AstKind::AnyKindType),
];

/// Names that can never be called as functions because they open other productions.
const RESERVED_FUNCTION_NAMES: &[&str] = &[
    "attribute",
    "comment",
    "document-node",
    "element",
    "empty-sequence",
    "function",
    "if",
    "item",
    "namespace-node",
    "node",
    "processing-instruction",
    "schema-attribute",
    "schema-element",
    "switch",
    "text",
    "typeswitch",
];

const COMPARISON_OPS: &[(&str, AstKind)] = &[
    ("<<", AstKind::NodeCompPrecedes),
    (">>", AstKind::NodeCompFollows),
    ("<=", AstKind::GeneralCompLE),
    (">=", AstKind::GeneralCompGE),
    ("!=", AstKind::GeneralCompNE),
    ("=", AstKind::GeneralCompEQ),
    ("<", AstKind::GeneralCompLT),
    (">", AstKind::GeneralCompGT),
    ("eq", AstKind::ValueCompEQ),
    ("ne", AstKind::ValueCompNE),
    ("lt", AstKind::ValueCompLT),
    ("le ", AstKind::ValueCompLE),
    ("gt", AstKind::ValueCompGT),
    ("ge", AstKind::ValueCompGE),
    ("is", AstKind::NodeCompIs),
];

const DECIMAL_FORMAT_PROPERTIES: &[&str] = &[
    "decimal-separator",
    "grouping-separator",
    "infinity",
    "minus-sign",
    "NaN",
    "percent",
    "per-mille",
    "zero-digit",
    "digit",
    "pattern-separator",
    "exponent-separator",
];

/// Implicit variables of a catch clause without an explicit variable list.
const IMPLICIT_CATCH_VARS: &[&str] = &["err:code", "err:description", "err:value"];

pub struct XQueryParser {
    tok: Tokenizer,
    ast: Ast,
    scopes: VarScopes,
}

impl XQueryParser {
    pub fn new(query: &str) -> Self {
        Self { tok: Tokenizer::new(query), ast: Ast::new(), scopes: VarScopes::new() }
    }

    pub fn parse(mut self) -> Result<Ast, Error> {
        let root = self.module()?;
        self.tok.consume_eof()?;
        self.ast.set_root(root);
        debug!(nodes = self.ast.len(), "parsed query");
        Ok(self.ast)
    }

    // ---- token helpers -------------------------------------------------------------------

    fn la(&self, s: &str) -> bool {
        self.tok.la_skip_ws(s).is_some()
    }

    fn la2(&self, a: &str, b: &str) -> bool {
        self.tok.la2(a, b).is_some()
    }

    fn accept(&mut self, s: &str) -> bool {
        self.tok.attempt_skip_ws(s)
    }

    fn accept2(&mut self, a: &str, b: &str) -> bool {
        self.tok.attempt2(a, b)
    }

    fn expect(&mut self, s: &str) -> Result<(), Error> {
        self.tok.consume_skip_ws(s).map(|_| ())
    }

    fn fail<T>(&self, expected: &[&str]) -> Result<T, Error> {
        Err(self.tok.expected(expected))
    }

    fn one_of(&mut self, options: &[&'static str]) -> Result<&'static str, Error> {
        match options.iter().find(|o| self.tok.la_skip_ws(o).is_some()) {
            Some(&o) => {
                self.expect(o)?;
                Ok(o)
            }
            None => self.fail(options),
        }
    }

    fn eqname(&mut self) -> Result<String, Error> {
        let t = self.tok.la_eqname_skip_ws().ok_or_else(|| self.tok.expected(&["QName"]))?;
        self.tok.consume(&t);
        Ok(t.text)
    }

    fn ncname(&mut self) -> Result<String, Error> {
        let t = self.tok.la_ncname_skip_ws().ok_or_else(|| self.tok.expected(&["NCName"]))?;
        self.tok.consume(&t);
        Ok(t.text)
    }

    fn string_literal(&mut self) -> Result<String, Error> {
        let t = self.tok.la_string_skip_ws()?.ok_or_else(|| self.tok.expected(&["string literal"]))?;
        self.tok.consume(&t);
        Ok(t.text)
    }

    fn var_name(&mut self) -> Result<String, Error> {
        self.expect("$")?;
        self.eqname()
    }

    fn leaf(&mut self, kind: AstKind, value: impl Into<compact_str::CompactString>) -> NodeId {
        self.ast.create_value(kind, value)
    }

    fn declare_var(&mut self, name: &str) -> ParseResult {
        let internal = self.scopes.declare(name)?;
        Ok(self.ast.create_value(AstKind::Variable, internal))
    }

    fn add_opt(&mut self, parent: NodeId, child: Option<NodeId>) {
        if let Some(c) = child {
            self.ast.add_child(parent, c);
        }
    }

    fn close_scopes(&mut self, count: usize) -> Result<(), Error> {
        for _ in 0..count {
            self.scopes.close_scope()?;
        }
        Ok(())
    }

    // ---- modules and prolog --------------------------------------------------------------

    fn module(&mut self) -> ParseResult {
        let xquery = self.ast.create(AstKind::XQuery);
        if self.la2("xquery", "version") || self.la2("xquery", "encoding") {
            self.expect("xquery")?;
            if self.accept("version") {
                let version = self.string_literal()?;
                self.ast.set_property(xquery, "version", version);
            }
            if self.accept("encoding") {
                let encoding = self.string_literal()?;
                self.ast.set_property(xquery, "encoding", encoding);
            }
            self.expect(";")?;
        }
        let module = if self.la2("module", "namespace") {
            self.library_module()?
        } else {
            let prolog = self.prolog()?;
            let expr = self.expr()?;
            let body = self.ast.node(AstKind::QueryBody, &[expr]);
            self.ast.node(AstKind::MainModule, &[prolog, body])
        };
        self.ast.add_child(xquery, module);
        Ok(xquery)
    }

    fn library_module(&mut self) -> ParseResult {
        self.expect("module")?;
        self.expect("namespace")?;
        let prefix = self.ncname()?;
        self.expect("=")?;
        let uri = self.string_literal()?;
        self.expect(";")?;
        let uri = self.leaf(AstKind::AnyURI, uri);
        let decl = self.leaf(AstKind::NamespaceDeclaration, prefix);
        self.ast.add_child(decl, uri);
        let prolog = self.prolog()?;
        Ok(self.ast.node(AstKind::LibraryModule, &[decl, prolog]))
    }

    fn prolog(&mut self) -> ParseResult {
        let prolog = self.ast.create(AstKind::Prolog);
        loop {
            let decl = if self.la("declare") {
                self.declaration()?
            } else if self.la2("import", "schema") {
                Some(self.schema_import()?)
            } else if self.la2("import", "module") {
                Some(self.module_import()?)
            } else {
                None
            };
            let Some(decl) = decl else { break };
            self.ast.add_child(prolog, decl);
            self.expect(";")?;
        }
        Ok(prolog)
    }

    fn declaration(&mut self) -> Result<Option<NodeId>, Error> {
        let node = if self.la2("declare", "default") {
            self.expect("declare")?;
            self.expect("default")?;
            if self.accept("element") {
                self.expect("namespace")?;
                let uri = self.string_literal()?;
                self.leaf(AstKind::DefaultElementNamespace, uri)
            } else if self.accept("function") {
                self.expect("namespace")?;
                let uri = self.string_literal()?;
                self.leaf(AstKind::DefaultFunctionNamespace, uri)
            } else if self.accept("collation") {
                let uri = self.string_literal()?;
                self.leaf(AstKind::CollationDeclaration, uri)
            } else if self.accept("order") {
                self.expect("empty")?;
                let mode = self.one_of(&["greatest", "least"])?;
                self.leaf(AstKind::EmptyOrderDeclaration, mode)
            } else if self.accept("decimal-format") {
                self.decimal_format(None)?
            } else {
                return self.fail(&["element", "function", "collation", "order", "decimal-format"]);
            }
        } else if self.accept2("declare", "boundary-space") {
            let mode = self.one_of(&["preserve", "strip"])?;
            self.leaf(AstKind::BoundarySpaceDeclaration, mode)
        } else if self.accept2("declare", "base-uri") {
            let uri = self.string_literal()?;
            self.leaf(AstKind::BaseURIDeclaration, uri)
        } else if self.accept2("declare", "construction") {
            let mode = self.one_of(&["strip", "preserve"])?;
            self.leaf(AstKind::ConstructionDeclaration, mode)
        } else if self.accept2("declare", "ordering") {
            let mode = self.one_of(&["ordered", "unordered"])?;
            self.leaf(AstKind::OrderingModeDeclaration, mode)
        } else if self.accept2("declare", "copy-namespaces") {
            let preserve = self.one_of(&["preserve", "no-preserve"])?;
            self.expect(",")?;
            let inherit = self.one_of(&["inherit", "no-inherit"])?;
            self.leaf(AstKind::CopyNamespacesDeclaration, format!("{preserve},{inherit}"))
        } else if self.accept2("declare", "decimal-format") {
            let name = self.eqname()?;
            self.decimal_format(Some(name))?
        } else if self.accept2("declare", "namespace") {
            let prefix = self.ncname()?;
            self.expect("=")?;
            let uri = self.string_literal()?;
            let uri = self.leaf(AstKind::AnyURI, uri);
            let decl = self.leaf(AstKind::NamespaceDeclaration, prefix);
            self.ast.add_child(decl, uri);
            decl
        } else if self.accept2("declare", "context") {
            self.expect("item")?;
            self.context_item_declaration()?
        } else if self.accept2("declare", "option") {
            let name = self.eqname()?;
            let value = self.string_literal()?;
            let value = self.leaf(AstKind::Str, value);
            let decl = self.leaf(AstKind::OptionDeclaration, name);
            self.ast.add_child(decl, value);
            decl
        } else if self.la2("declare", "variable")
            || self.la2("declare", "function")
            || self.la2("declare", "%")
            || self.la2("declare", "updating")
        {
            self.expect("declare")?;
            self.annotated_declaration()?
        } else {
            return Ok(None);
        };
        Ok(Some(node))
    }

    fn decimal_format(&mut self, name: Option<String>) -> ParseResult {
        let decl = self.ast.create(AstKind::DecimalFormatDeclaration);
        if let Some(name) = name {
            self.ast.set_value(decl, name);
        }
        while let Some(prop) = DECIMAL_FORMAT_PROPERTIES.iter().find(|p| self.la(p)) {
            self.expect(prop)?;
            self.expect("=")?;
            let value = self.string_literal()?;
            let value = self.leaf(AstKind::Str, value);
            let property = self.leaf(AstKind::DecimalFormatProperty, *prop);
            self.ast.add_child(property, value);
            self.ast.add_child(decl, property);
        }
        Ok(decl)
    }

    fn uri_locations(&mut self, parent: NodeId) -> Result<(), Error> {
        if self.accept("at") {
            loop {
                let location = self.string_literal()?;
                let location = self.leaf(AstKind::AnyURI, location);
                self.ast.add_child(parent, location);
                if !self.accept(",") {
                    break;
                }
            }
        }
        Ok(())
    }

    fn schema_import(&mut self) -> ParseResult {
        self.expect("import")?;
        self.expect("schema")?;
        let mut prefix = None;
        if self.accept("namespace") {
            prefix = Some(self.ncname()?);
            self.expect("=")?;
        } else if self.accept2("default", "element") {
            self.expect("namespace")?;
            prefix = Some(String::new());
        }
        let uri = self.string_literal()?;
        let import = self.leaf(AstKind::SchemaImport, uri);
        if let Some(prefix) = prefix {
            self.ast.set_property(import, "prefix", prefix);
        }
        self.uri_locations(import)?;
        Ok(import)
    }

    fn module_import(&mut self) -> ParseResult {
        self.expect("import")?;
        self.expect("module")?;
        let mut prefix = None;
        if self.accept("namespace") {
            prefix = Some(self.ncname()?);
            self.expect("=")?;
        }
        let uri = self.string_literal()?;
        let import = self.leaf(AstKind::ModuleImport, uri);
        if let Some(prefix) = prefix {
            self.ast.set_property(import, "prefix", prefix);
        }
        self.uri_locations(import)?;
        Ok(import)
    }

    fn context_item_declaration(&mut self) -> ParseResult {
        let decl = self.ast.create(AstKind::ContextItemDeclaration);
        if self.accept("as") {
            let ty = self.item_type()?;
            self.ast.add_child(decl, ty);
        }
        if self.accept("external") {
            let ext = self.ast.create(AstKind::ExternalVariable);
            self.ast.add_child(decl, ext);
            if self.accept(":=") {
                let init = self.expr_single()?;
                self.ast.add_child(decl, init);
            }
        } else {
            self.expect(":=")?;
            let init = self.expr_single()?;
            self.ast.add_child(decl, init);
        }
        Ok(decl)
    }

    fn literal(&mut self) -> Result<Option<NodeId>, Error> {
        if let Some((kind, t)) = self.tok.la_numeric_skip_ws() {
            self.tok.consume(&t);
            return Ok(Some(self.leaf(kind, t.text)));
        }
        if let Some(t) = self.tok.la_string_skip_ws()? {
            self.tok.consume(&t);
            return Ok(Some(self.leaf(AstKind::Str, t.text)));
        }
        Ok(None)
    }

    fn annotations(&mut self) -> Result<Vec<NodeId>, Error> {
        let mut annotations = Vec::new();
        loop {
            if self.accept("updating") {
                annotations.push(self.leaf(AstKind::Annotation, "updating"));
            } else if self.accept("%") {
                let name = self.eqname()?;
                let annotation = self.leaf(AstKind::Annotation, name);
                if self.accept("(") {
                    loop {
                        let Some(lit) = self.literal()? else { return self.fail(&["literal"]) };
                        self.ast.add_child(annotation, lit);
                        if !self.accept(",") {
                            break;
                        }
                    }
                    self.expect(")")?;
                }
                annotations.push(annotation);
            } else {
                return Ok(annotations);
            }
        }
    }

    fn annotated_declaration(&mut self) -> ParseResult {
        let annotations = self.annotations()?;
        if self.accept("variable") {
            self.variable_declaration(&annotations)
        } else if self.accept("function") {
            self.function_declaration(&annotations)
        } else {
            self.fail(&["variable", "function"])
        }
    }

    fn variable_declaration(&mut self, annotations: &[NodeId]) -> ParseResult {
        let name = self.var_name()?;
        let ty = self.type_declaration()?;
        let mut external = None;
        let mut init = None;
        if self.accept("external") {
            external = Some(self.ast.create(AstKind::ExternalVariable));
            if self.accept(":=") {
                init = Some(self.expr_single()?);
            }
        } else {
            self.expect(":=")?;
            init = Some(self.expr_single()?);
        }
        // Declared after the initializer: a global cannot see itself.
        let var = self.declare_var(&name)?;
        let decl = self.ast.node(AstKind::VariableDeclaration, annotations);
        self.ast.add_child(decl, var);
        self.add_opt(decl, ty);
        self.add_opt(decl, external);
        self.add_opt(decl, init);
        Ok(decl)
    }

    fn function_declaration(&mut self, annotations: &[NodeId]) -> ParseResult {
        let name = self.eqname()?;
        let decl = self.ast.node(AstKind::FunctionDecl, annotations);
        self.ast.set_value(decl, name);
        self.scopes.open_scope();
        for param in self.param_list()? {
            self.ast.add_child(decl, param);
        }
        self.scopes.offer_scope();
        let ret = self.type_declaration()?;
        self.add_opt(decl, ret);
        let body = if self.accept("external") { self.ast.create(AstKind::ExternalVariable) } else { self.enclosed_expr()? };
        self.ast.add_child(decl, body);
        self.scopes.close_scope()?;
        Ok(decl)
    }

    /// `( $a as T, $b )`; declares each parameter in the current scope.
    fn param_list(&mut self) -> Result<Vec<NodeId>, Error> {
        self.expect("(")?;
        let mut params = Vec::new();
        if !self.la(")") {
            loop {
                let name = self.var_name()?;
                let ty = self.type_declaration()?;
                let var = self.declare_var(&name)?;
                let param = self.ast.node(AstKind::TypedVariableDeclaration, &[var]);
                self.add_opt(param, ty);
                params.push(param);
                if !self.accept(",") {
                    break;
                }
            }
        }
        self.expect(")")?;
        Ok(params)
    }

    /// `{ Expr? }`; an empty body yields `EmptySequence`.
    fn enclosed_expr(&mut self) -> ParseResult {
        self.expect("{")?;
        if self.accept("}") {
            return Ok(self.ast.create(AstKind::EmptySequence));
        }
        let expr = self.expr()?;
        self.expect("}")?;
        Ok(expr)
    }

    fn type_declaration(&mut self) -> Result<Option<NodeId>, Error> {
        if self.accept("as") { Ok(Some(self.sequence_type()?)) } else { Ok(None) }
    }

    // ---- expressions ---------------------------------------------------------------------

    fn expr(&mut self) -> ParseResult {
        let first = self.expr_single()?;
        if !self.la(",") {
            return Ok(first);
        }
        let seq = self.ast.node(AstKind::SequenceExpr, &[first]);
        while self.accept(",") {
            let e = self.expr_single()?;
            self.ast.add_child(seq, e);
        }
        Ok(seq)
    }

    fn expr_single(&mut self) -> ParseResult {
        if self.la2("for", "$") || self.la2("for", "sliding") || self.la2("for", "tumbling") || self.la2("let", "$") {
            self.flwor()
        } else if self.la2("some", "$") || self.la2("every", "$") {
            self.quantified()
        } else if self.la2("switch", "(") {
            self.switch()
        } else if self.la2("typeswitch", "(") {
            self.typeswitch()
        } else if self.la2("if", "(") {
            self.if_expr()
        } else if self.la2("try", "{") {
            self.try_catch()
        } else if self.la2("insert", "node") || self.la2("insert", "nodes") {
            self.insert()
        } else if self.la2("delete", "node") || self.la2("delete", "nodes") {
            self.delete()
        } else if self.la2("rename", "node") {
            self.rename()
        } else if self.la2("replace", "node") || self.la2("replace", "value") {
            self.replace()
        } else if self.la2("copy", "$") {
            self.transform()
        } else {
            self.or_expr()
        }
    }

    fn flwor(&mut self) -> ParseResult {
        let flwor = self.ast.create(AstKind::FlowrExpr);
        let mut opened = 0;
        let mut initial = true;
        loop {
            if self.la2("for", "$") {
                opened += self.for_clause(flwor)?;
            } else if self.la2("for", "sliding") || self.la2("for", "tumbling") {
                opened += self.window_clause(flwor)?;
            } else if self.la2("let", "$") {
                opened += self.let_clause(flwor)?;
            } else if initial {
                return self.fail(&["for", "let"]);
            } else if self.accept("where") {
                let cond = self.expr_single()?;
                let clause = self.ast.node(AstKind::WhereClause, &[cond]);
                self.ast.add_child(flwor, clause);
            } else if self.la2("group", "by") {
                opened += self.group_by_clause(flwor)?;
            } else if self.la2("order", "by") || self.la2("stable", "order") {
                self.order_by_clause(flwor)?;
            } else if self.la2("count", "$") {
                self.expect("count")?;
                let name = self.var_name()?;
                self.scopes.open_scope();
                opened += 1;
                let var = self.declare_var(&name)?;
                self.scopes.offer_scope();
                let clause = self.ast.node(AstKind::CountClause, &[var]);
                self.ast.add_child(flwor, clause);
            } else {
                break;
            }
            initial = false;
        }
        if !self.accept("return") {
            return self.fail(&["for", "let", "where", "group by", "order by", "count", "return"]);
        }
        let ret = self.expr_single()?;
        let clause = self.ast.node(AstKind::ReturnClause, &[ret]);
        self.ast.add_child(flwor, clause);
        self.close_scopes(opened)?;
        Ok(flwor)
    }

    fn for_clause(&mut self, flwor: NodeId) -> Result<usize, Error> {
        self.expect("for")?;
        let mut opened = 0;
        loop {
            let name = self.var_name()?;
            let ty = self.type_declaration()?;
            let allowing = self.accept2("allowing", "empty").then(|| self.ast.create(AstKind::AllowingEmpty));
            let pos = if self.accept("at") { Some(self.var_name()?) } else { None };
            self.expect("in")?;
            let expr = self.expr_single()?;

            self.scopes.open_scope();
            opened += 1;
            let var = self.declare_var(&name)?;
            let binding = self.ast.node(AstKind::TypedVariableBinding, &[var]);
            self.add_opt(binding, ty);
            let clause = self.ast.node(AstKind::ForClause, &[binding]);
            self.add_opt(clause, allowing);
            if let Some(pos) = pos {
                let pos_var = self.declare_var(&pos)?;
                let pos_binding = self.ast.node(AstKind::TypedVariableBinding, &[pos_var]);
                self.ast.add_child(clause, pos_binding);
            }
            self.ast.add_child(clause, expr);
            self.scopes.offer_scope();
            self.ast.add_child(flwor, clause);
            if !self.accept(",") {
                return Ok(opened);
            }
        }
    }

    fn let_clause(&mut self, flwor: NodeId) -> Result<usize, Error> {
        self.expect("let")?;
        let mut opened = 0;
        loop {
            let name = self.var_name()?;
            let ty = self.type_declaration()?;
            self.expect(":=")?;
            let expr = self.expr_single()?;

            self.scopes.open_scope();
            opened += 1;
            let var = self.declare_var(&name)?;
            self.scopes.offer_scope();
            let binding = self.ast.node(AstKind::TypedVariableBinding, &[var]);
            self.add_opt(binding, ty);
            let clause = self.ast.node(AstKind::LetClause, &[binding, expr]);
            self.ast.add_child(flwor, clause);
            if !self.accept(",") {
                return Ok(opened);
            }
        }
    }

    fn window_clause(&mut self, flwor: NodeId) -> Result<usize, Error> {
        self.expect("for")?;
        let sliding = if self.accept("sliding") {
            true
        } else {
            self.expect("tumbling")?;
            false
        };
        self.expect("window")?;
        let name = self.var_name()?;
        let ty = self.type_declaration()?;
        self.expect("in")?;
        let expr = self.expr_single()?;

        let mut opened = 0;
        self.expect("start")?;
        self.scopes.open_scope();
        opened += 1;
        let start_vars = self.window_vars()?;
        self.scopes.offer_scope();
        self.expect("when")?;
        let start_cond = self.expr_single()?;
        let start = self.ast.node(AstKind::WindowStartCondition, &[start_vars, start_cond]);

        let end = if sliding || self.la("end") || self.la2("only", "end") {
            let only = self.accept2("only", "end");
            if !only {
                self.expect("end")?;
            }
            self.scopes.open_scope();
            opened += 1;
            let end_vars = self.window_vars()?;
            self.scopes.offer_scope();
            self.expect("when")?;
            let end_cond = self.expr_single()?;
            let end = self.ast.node(AstKind::WindowEndCondition, &[end_vars, end_cond]);
            if only {
                self.ast.set_property(end, "only", "true");
            }
            Some(end)
        } else {
            None
        };

        self.scopes.open_scope();
        opened += 1;
        let var = self.declare_var(&name)?;
        self.scopes.offer_scope();
        let binding = self.ast.node(AstKind::TypedVariableBinding, &[var]);
        self.add_opt(binding, ty);
        let kind = if sliding { AstKind::SlidingWindowClause } else { AstKind::TumblingWindowClause };
        let clause = self.ast.node(kind, &[binding, expr, start]);
        self.add_opt(clause, end);
        self.ast.add_child(flwor, clause);
        Ok(opened)
    }

    fn window_vars(&mut self) -> ParseResult {
        let vars = self.ast.create(AstKind::WindowVars);
        let declare = |this: &mut Self, kind: AstKind| -> Result<(), Error> {
            let name = this.var_name()?;
            let var = this.declare_var(&name)?;
            let wrapper = this.ast.node(kind, &[var]);
            this.ast.add_child(vars, wrapper);
            Ok(())
        };
        if self.la("$") {
            declare(self, AstKind::CurrentItem)?;
        }
        if self.accept("at") {
            declare(self, AstKind::PositionalVar)?;
        }
        if self.accept("previous") {
            declare(self, AstKind::PreviousItem)?;
        }
        if self.accept("next") {
            declare(self, AstKind::NextItem)?;
        }
        Ok(vars)
    }

    /// `group by $k` refers to an existing binding; `group by $k := E` binds `$k` through a
    /// synthetic let clause placed before the group clause.
    fn group_by_clause(&mut self, flwor: NodeId) -> Result<usize, Error> {
        self.expect("group")?;
        self.expect("by")?;
        let group_by = self.ast.create(AstKind::GroupByClause);
        let mut opened = 0;
        loop {
            let name = self.var_name()?;
            let ty = self.type_declaration()?;
            let internal = if self.accept(":=") {
                let expr = self.expr_single()?;
                self.scopes.open_scope();
                opened += 1;
                let var = self.declare_var(&name)?;
                self.scopes.offer_scope();
                let internal = self.ast.value(var).unwrap_or_default().to_string();
                let binding = self.ast.node(AstKind::TypedVariableBinding, &[var]);
                self.add_opt(binding, ty);
                let clause = self.ast.node(AstKind::LetClause, &[binding, expr]);
                self.ast.add_child(flwor, clause);
                internal
            } else {
                self.scopes.resolve(&name)?
            };
            let var_ref = self.leaf(AstKind::VariableRef, internal);
            let spec = self.ast.node(AstKind::GroupBySpec, &[var_ref]);
            if self.accept("collation") {
                let uri = self.string_literal()?;
                let collation = self.leaf(AstKind::Collation, uri);
                self.ast.add_child(spec, collation);
            }
            self.ast.add_child(group_by, spec);
            if !self.accept(",") {
                break;
            }
        }
        self.ast.add_child(flwor, group_by);
        Ok(opened)
    }

    fn order_by_clause(&mut self, flwor: NodeId) -> Result<(), Error> {
        let stable = self.accept("stable");
        self.expect("order")?;
        self.expect("by")?;
        let order_by = self.ast.create(AstKind::OrderByClause);
        if stable {
            self.ast.set_property(order_by, "stable", "true");
        }
        loop {
            let key = self.expr_single()?;
            let spec = self.ast.node(AstKind::OrderBySpec, &[key]);
            if self.accept("ascending") {
                let kind = self.leaf(AstKind::OrderByKind, "ascending");
                self.ast.add_child(spec, kind);
            } else if self.accept("descending") {
                let kind = self.leaf(AstKind::OrderByKind, "descending");
                self.ast.add_child(spec, kind);
            }
            if self.accept("empty") {
                let mode = self.one_of(&["greatest", "least"])?;
                let mode = self.leaf(AstKind::OrderByEmptyMode, mode);
                self.ast.add_child(spec, mode);
            }
            if self.accept("collation") {
                let uri = self.string_literal()?;
                let collation = self.leaf(AstKind::Collation, uri);
                self.ast.add_child(spec, collation);
            }
            self.ast.add_child(order_by, spec);
            if !self.accept(",") {
                break;
            }
        }
        self.ast.add_child(flwor, order_by);
        Ok(())
    }

    fn quantified(&mut self) -> ParseResult {
        let quantifier = if self.accept("some") {
            self.ast.create(AstKind::SomeQuantifier)
        } else {
            self.expect("every")?;
            self.ast.create(AstKind::EveryQuantifier)
        };
        let expr = self.ast.node(AstKind::QuantifiedExpr, &[quantifier]);
        let mut opened = 0;
        loop {
            let name = self.var_name()?;
            let ty = self.type_declaration()?;
            self.expect("in")?;
            let domain = self.expr_single()?;
            self.scopes.open_scope();
            opened += 1;
            let var = self.declare_var(&name)?;
            self.scopes.offer_scope();
            let binding = self.ast.node(AstKind::TypedVariableBinding, &[var]);
            self.add_opt(binding, ty);
            self.ast.add_child(expr, binding);
            self.ast.add_child(expr, domain);
            if !self.accept(",") {
                break;
            }
        }
        self.expect("satisfies")?;
        let satisfies = self.expr_single()?;
        self.ast.add_child(expr, satisfies);
        self.close_scopes(opened)?;
        Ok(expr)
    }

    fn switch(&mut self) -> ParseResult {
        self.expect("switch")?;
        self.expect("(")?;
        let operand = self.expr()?;
        self.expect(")")?;
        let switch = self.ast.node(AstKind::SwitchExpr, &[operand]);
        let mut clauses = 0;
        while self.la("case") {
            let clause = self.ast.create(AstKind::SwitchClause);
            while self.accept("case") {
                let case = self.expr_single()?;
                self.ast.add_child(clause, case);
            }
            self.expect("return")?;
            let ret = self.expr_single()?;
            self.ast.add_child(clause, ret);
            self.ast.add_child(switch, clause);
            clauses += 1;
        }
        if clauses == 0 {
            return self.fail(&["case"]);
        }
        self.expect("default")?;
        self.expect("return")?;
        let default = self.expr_single()?;
        self.ast.add_child(switch, default);
        Ok(switch)
    }

    fn typeswitch(&mut self) -> ParseResult {
        self.expect("typeswitch")?;
        self.expect("(")?;
        let operand = self.expr()?;
        self.expect(")")?;
        let typeswitch = self.ast.node(AstKind::TypeSwitch, &[operand]);
        let mut cases = 0;
        while self.accept("case") {
            let name = if self.la("$") {
                let name = self.var_name()?;
                self.expect("as")?;
                Some(name)
            } else {
                None
            };
            let mut types = Vec::new();
            loop {
                types.push(self.sequence_type()?);
                if !self.accept("|") {
                    break;
                }
            }
            self.expect("return")?;
            let case = self.typeswitch_case(name.as_deref(), &types)?;
            self.ast.add_child(typeswitch, case);
            cases += 1;
        }
        if cases == 0 {
            return self.fail(&["case"]);
        }
        self.expect("default")?;
        let name = if self.la("$") { Some(self.var_name()?) } else { None };
        self.expect("return")?;
        let default = self.typeswitch_case(name.as_deref(), &[])?;
        self.ast.set_property(default, "default", "true");
        self.ast.add_child(typeswitch, default);
        Ok(typeswitch)
    }

    fn typeswitch_case(&mut self, name: Option<&str>, types: &[NodeId]) -> ParseResult {
        let case = self.ast.create(AstKind::TypeSwitchCase);
        self.scopes.open_scope();
        if let Some(name) = name {
            let var = self.declare_var(name)?;
            self.ast.add_child(case, var);
        }
        self.scopes.offer_scope();
        for ty in types {
            self.ast.add_child(case, *ty);
        }
        let ret = self.expr_single()?;
        self.ast.add_child(case, ret);
        self.scopes.close_scope()?;
        Ok(case)
    }

    fn if_expr(&mut self) -> ParseResult {
        self.expect("if")?;
        self.expect("(")?;
        let cond = self.expr()?;
        self.expect(")")?;
        self.expect("then")?;
        let then = self.expr_single()?;
        self.expect("else")?;
        let otherwise = self.expr_single()?;
        Ok(self.ast.node(AstKind::IfExpr, &[cond, then, otherwise]))
    }

    fn try_catch(&mut self) -> ParseResult {
        self.expect("try")?;
        let body = self.enclosed_expr()?;
        let try_catch = self.ast.node(AstKind::TryCatchExpr, &[body]);
        let mut clauses = 0;
        while self.accept("catch") {
            let errors = self.ast.create(AstKind::CatchErrorList);
            loop {
                let test = self.name_test()?;
                self.ast.add_child(errors, test);
                if !self.accept("|") {
                    break;
                }
            }
            self.scopes.open_scope();
            let vars = self.ast.create(AstKind::CatchVar);
            if self.accept("(") {
                loop {
                    let name = self.var_name()?;
                    let var = self.declare_var(&name)?;
                    self.ast.add_child(vars, var);
                    if !self.accept(",") {
                        break;
                    }
                }
                self.expect(")")?;
            } else {
                for name in IMPLICIT_CATCH_VARS {
                    let var = self.declare_var(name)?;
                    self.ast.add_child(vars, var);
                }
            }
            self.scopes.offer_scope();
            let handler = self.enclosed_expr()?;
            self.scopes.close_scope()?;
            let clause = self.ast.node(AstKind::CatchClause, &[errors, vars, handler]);
            self.ast.add_child(try_catch, clause);
            clauses += 1;
        }
        if clauses == 0 {
            return self.fail(&["catch"]);
        }
        Ok(try_catch)
    }

    fn or_expr(&mut self) -> ParseResult {
        let mut left = self.and_expr()?;
        while self.accept("or ") {
            let right = self.and_expr()?;
            left = self.ast.node(AstKind::OrExpr, &[left, right]);
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> ParseResult {
        let mut left = self.comparison()?;
        while self.accept("and ") {
            let right = self.comparison()?;
            left = self.ast.node(AstKind::AndExpr, &[left, right]);
        }
        Ok(left)
    }

    fn comparison(&mut self) -> ParseResult {
        let left = self.string_concat()?;
        let Some(&(symbol, kind)) = COMPARISON_OPS.iter().find(|(s, _)| self.la(s)) else {
            return Ok(left);
        };
        self.expect(symbol)?;
        let op = self.ast.create(kind);
        let right = self.string_concat()?;
        Ok(self.ast.node(AstKind::ComparisonExpr, &[op, left, right]))
    }

    fn string_concat(&mut self) -> ParseResult {
        let first = self.range()?;
        if !self.la("||") {
            return Ok(first);
        }
        let call = self.leaf(AstKind::FunctionCall, "fn:concat");
        self.ast.add_child(call, first);
        while self.accept("||") {
            let next = self.range()?;
            self.ast.add_child(call, next);
        }
        Ok(call)
    }

    fn range(&mut self) -> ParseResult {
        let left = self.additive()?;
        if self.accept("to") {
            let right = self.additive()?;
            return Ok(self.ast.node(AstKind::RangeExpr, &[left, right]));
        }
        Ok(left)
    }

    fn additive(&mut self) -> ParseResult {
        let mut left = self.multiplicative()?;
        loop {
            let kind = if self.accept("+") {
                AstKind::AddOp
            } else if self.accept("-") {
                AstKind::SubtractOp
            } else {
                return Ok(left);
            };
            let op = self.ast.create(kind);
            let right = self.multiplicative()?;
            left = self.ast.node(AstKind::ArithmeticExpr, &[op, left, right]);
        }
    }

    fn multiplicative(&mut self) -> ParseResult {
        let mut left = self.union()?;
        loop {
            let kind = if self.accept("*") {
                AstKind::MultiplyOp
            } else if self.accept("div ") {
                AstKind::DivideOp
            } else if self.accept("idiv") {
                AstKind::IDivideOp
            } else if self.accept("mod ") {
                AstKind::ModulusOp
            } else {
                return Ok(left);
            };
            let op = self.ast.create(kind);
            let right = self.union()?;
            left = self.ast.node(AstKind::ArithmeticExpr, &[op, left, right]);
        }
    }

    fn union(&mut self) -> ParseResult {
        let mut left = self.intersect_except()?;
        while self.accept("union") || (!self.la("||") && self.accept("|")) {
            let right = self.intersect_except()?;
            left = self.ast.node(AstKind::UnionExpr, &[left, right]);
        }
        Ok(left)
    }

    fn intersect_except(&mut self) -> ParseResult {
        let mut left = self.instance_of()?;
        loop {
            let kind = if self.accept("intersect") {
                AstKind::IntersectExpr
            } else if self.accept("except") {
                AstKind::ExceptExpr
            } else {
                return Ok(left);
            };
            let right = self.instance_of()?;
            left = self.ast.node(kind, &[left, right]);
        }
    }

    fn instance_of(&mut self) -> ParseResult {
        let expr = self.treat()?;
        if self.accept2("instance", "of") {
            let ty = self.sequence_type()?;
            return Ok(self.ast.node(AstKind::InstanceofExpr, &[expr, ty]));
        }
        Ok(expr)
    }

    fn treat(&mut self) -> ParseResult {
        let expr = self.castable()?;
        if self.accept2("treat", "as") {
            let ty = self.sequence_type()?;
            return Ok(self.ast.node(AstKind::TreatExpr, &[expr, ty]));
        }
        Ok(expr)
    }

    fn castable(&mut self) -> ParseResult {
        let expr = self.cast()?;
        if self.accept2("castable ", "as") {
            let ty = self.single_type()?;
            return Ok(self.ast.node(AstKind::CastableExpr, &[expr, ty]));
        }
        Ok(expr)
    }

    fn cast(&mut self) -> ParseResult {
        let expr = self.unary()?;
        if self.accept2("cast ", "as") {
            let ty = self.single_type()?;
            return Ok(self.ast.node(AstKind::CastExpr, &[expr, ty]));
        }
        Ok(expr)
    }

    fn unary(&mut self) -> ParseResult {
        let mut negate = false;
        loop {
            if self.accept("-") {
                negate = !negate;
            } else if !self.accept("+") {
                break;
            }
        }
        let expr = self.value_expr()?;
        if !negate {
            return Ok(expr);
        }
        let op = self.ast.create(AstKind::MultiplyOp);
        let minus_one = self.leaf(AstKind::Int, "-1");
        Ok(self.ast.node(AstKind::ArithmeticExpr, &[op, minus_one, expr]))
    }

    fn value_expr(&mut self) -> ParseResult {
        if self.la2("validate", "{")
            || self.la2("validate", "lax")
            || self.la2("validate", "strict")
            || self.la2("validate", "type")
        {
            self.validate()
        } else if self.la("(#") {
            self.extension()
        } else {
            self.path()
        }
    }

    fn validate(&mut self) -> ParseResult {
        self.expect("validate")?;
        let mode = if self.accept("lax") {
            "lax".to_string()
        } else if self.accept("strict") {
            "strict".to_string()
        } else if self.accept("type") {
            format!("type:{}", self.eqname()?)
        } else {
            "strict".to_string()
        };
        self.expect("{")?;
        let expr = self.expr()?;
        self.expect("}")?;
        let validate = self.leaf(AstKind::ValidateExpr, mode);
        self.ast.add_child(validate, expr);
        Ok(validate)
    }

    fn extension(&mut self) -> ParseResult {
        let ext = self.ast.create(AstKind::ExtensionExpr);
        while self.accept("(#") {
            let name = self.eqname()?;
            let content = self.tok.la_until("#)").ok_or_else(|| self.tok.expected(&["#)"]))?;
            self.tok.consume(&content);
            self.expect("#)")?;
            let pragma = self.leaf(AstKind::Pragma, name);
            let text = self.leaf(AstKind::Str, content.text.trim());
            self.ast.add_child(pragma, text);
            self.ast.add_child(ext, pragma);
        }
        self.expect("{")?;
        if !self.accept("}") {
            let body = self.expr()?;
            self.expect("}")?;
            self.ast.add_child(ext, body);
        }
        Ok(ext)
    }

    // ---- paths ---------------------------------------------------------------------------

    fn descendant_or_self_step(&mut self) -> NodeId {
        let axis = self.leaf(AstKind::AxisSpec, "descendant-or-self");
        let test = self.ast.create(AstKind::AnyKindType);
        self.ast.node(AstKind::StepExpr, &[axis, test])
    }

    fn step_ahead(&self) -> bool {
        self.tok.peek_skip_ws().is_some_and(|c| is_name_start(c) || matches!(c, '@' | '*' | '.' | '$' | '(' | '<' | '"' | '\'') || c.is_ascii_digit())
    }

    fn path(&mut self) -> ParseResult {
        let path = if self.accept("//") {
            let root = self.ast.create(AstKind::RootPath);
            let dos = self.descendant_or_self_step();
            let step = self.step()?;
            self.ast.node(AstKind::PathExpr, &[root, dos, step])
        } else if self.accept("/") {
            let root = self.ast.create(AstKind::RootPath);
            let path = self.ast.node(AstKind::PathExpr, &[root]);
            if !self.step_ahead() {
                return Ok(path);
            }
            let step = self.step()?;
            self.ast.add_child(path, step);
            path
        } else {
            let first = self.step()?;
            if !self.la("/") {
                return Ok(first);
            }
            self.ast.node(AstKind::PathExpr, &[first])
        };
        loop {
            if self.accept("//") {
                let dos = self.descendant_or_self_step();
                self.ast.add_child(path, dos);
            } else if !self.accept("/") {
                return Ok(path);
            }
            let step = self.step()?;
            self.ast.add_child(path, step);
        }
    }

    fn step(&mut self) -> ParseResult {
        let step = if self.accept("..") {
            let axis = self.leaf(AstKind::AxisSpec, "parent");
            let test = self.ast.create(AstKind::AnyKindType);
            self.ast.node(AstKind::StepExpr, &[axis, test])
        } else if self.accept("@") {
            let axis = self.leaf(AstKind::AxisSpec, "attribute");
            let test = self.node_test()?;
            self.ast.node(AstKind::StepExpr, &[axis, test])
        } else if let Some(axis) = AXES.iter().find(|a| self.la2(a, "::")) {
            self.expect(axis)?;
            self.expect("::")?;
            let axis = self.leaf(AstKind::AxisSpec, *axis);
            let test = self.node_test()?;
            self.ast.node(AstKind::StepExpr, &[axis, test])
        } else if self.primary_ahead() {
            return self.postfix();
        } else {
            let axis = self.leaf(AstKind::AxisSpec, "child");
            let test = self.node_test()?;
            self.ast.node(AstKind::StepExpr, &[axis, test])
        };
        while self.accept("[") {
            let pred = self.expr()?;
            self.expect("]")?;
            let pred = self.ast.node(AstKind::Predicate, &[pred]);
            self.ast.add_child(step, pred);
        }
        Ok(step)
    }

    fn node_test(&mut self) -> ParseResult {
        match self.kind_test()? {
            Some(test) => Ok(test),
            None => self.name_test(),
        }
    }

    /// `*`, `prefix:*`, `*:local` or an EQName.
    fn name_test(&mut self) -> ParseResult {
        if self.accept("*:") {
            let local = self.ncname()?;
            return Ok(self.leaf(AstKind::NameTest, format!("*:{local}")));
        }
        if self.accept("*") {
            return Ok(self.leaf(AstKind::NameTest, "*"));
        }
        if let Some(prefix) = self.tok.la_ncname_skip_ws()
            && let Some(wildcard) = self.tok.la_at(prefix.end, ":*")
        {
            self.tok.consume(&wildcard);
            return Ok(self.leaf(AstKind::NameTest, format!("{}:*", prefix.text)));
        }
        let name = self.eqname()?;
        Ok(self.leaf(AstKind::NameTest, name))
    }

    fn computed_constructor_ahead(&self, keyword: &str, named: bool) -> bool {
        let Some(k) = self.tok.la_skip_ws(keyword) else { return false };
        if self.tok.la_ws_at(k.end, "{").is_some() {
            return true;
        }
        named && self.tok.la_eqname_ws_at(k.end).is_some_and(|n| self.tok.la_ws_at(n.end, "{").is_some())
    }

    fn primary_ahead(&self) -> bool {
        match self.tok.peek_skip_ws() {
            Some('$' | '(' | '"' | '\'' | '<') => return true,
            Some('.') => return self.tok.la_skip_ws("..").is_none(),
            Some(c) if c.is_ascii_digit() => return true,
            _ => {}
        }
        if self.la2("ordered", "{") || self.la2("unordered", "{") || self.la2("function", "(") {
            return true;
        }
        if ["document", "text", "comment"].iter().any(|k| self.computed_constructor_ahead(k, false))
            || ["element", "attribute", "namespace", "processing-instruction"]
                .iter()
                .any(|k| self.computed_constructor_ahead(k, true))
        {
            return true;
        }
        match self.tok.la_eqname_skip_ws() {
            Some(name) if !RESERVED_FUNCTION_NAMES.contains(&name.text.as_str()) => {
                self.tok.la_ws_at(name.end, "(").is_some() || self.tok.la_ws_at(name.end, "#").is_some()
            }
            _ => false,
        }
    }

    fn postfix(&mut self) -> ParseResult {
        let mut expr = self.primary()?;
        loop {
            if self.accept("[") {
                let pred = self.expr()?;
                self.expect("]")?;
                let pred = self.ast.node(AstKind::Predicate, &[pred]);
                expr = self.ast.node(AstKind::FilterExpr, &[expr, pred]);
            } else if self.la("(") {
                let args = self.argument_list()?;
                expr = self.ast.node(AstKind::DynamicFunctionCallExpr, &[expr]);
                for arg in args {
                    self.ast.add_child(expr, arg);
                }
            } else {
                return Ok(expr);
            }
        }
    }

    fn argument_list(&mut self) -> Result<Vec<NodeId>, Error> {
        self.expect("(")?;
        let mut args = Vec::new();
        if self.accept(")") {
            return Ok(args);
        }
        loop {
            let arg = if self.accept("?") { self.ast.create(AstKind::ArgumentPlaceHolder) } else { self.expr_single()? };
            args.push(arg);
            if !self.accept(",") {
                break;
            }
        }
        self.expect(")")?;
        Ok(args)
    }

    fn primary(&mut self) -> ParseResult {
        if let Some(lit) = self.literal()? {
            return Ok(lit);
        }
        if self.la("$") {
            let name = self.var_name()?;
            let internal = self.scopes.resolve(&name)?;
            return Ok(self.leaf(AstKind::VariableRef, internal));
        }
        if self.accept("(") {
            if self.accept(")") {
                return Ok(self.ast.create(AstKind::EmptySequence));
            }
            let expr = self.expr()?;
            self.expect(")")?;
            return Ok(expr);
        }
        if self.accept(".") {
            return Ok(self.ast.create(AstKind::ContextItemExpr));
        }
        if self.tok.peek_skip_ws() == Some('<') {
            self.tok.skip_ws();
            return self.direct_constructor();
        }
        if self.accept2("ordered", "{") {
            let expr = self.expr()?;
            self.expect("}")?;
            return Ok(self.ast.node(AstKind::OrderedExpr, &[expr]));
        }
        if self.accept2("unordered", "{") {
            let expr = self.expr()?;
            self.expect("}")?;
            return Ok(self.ast.node(AstKind::UnorderedExpr, &[expr]));
        }
        if self.accept("function") {
            return self.inline_function();
        }
        if let Some(ctor) = self.computed_constructor()? {
            return Ok(ctor);
        }
        let name = self.eqname()?;
        if self.accept("#") {
            let arity = match self.tok.la_numeric_skip_ws() {
                Some((AstKind::Int, t)) => {
                    self.tok.consume(&t);
                    t.text
                }
                _ => return self.fail(&["integer literal"]),
            };
            let name = self.leaf(AstKind::QNm, name);
            let arity = self.leaf(AstKind::Int, arity);
            return Ok(self.ast.node(AstKind::LiteralFuncItem, &[name, arity]));
        }
        let args = self.argument_list()?;
        let call = self.leaf(AstKind::FunctionCall, name);
        for arg in args {
            self.ast.add_child(call, arg);
        }
        Ok(call)
    }

    fn inline_function(&mut self) -> ParseResult {
        let item = self.ast.create(AstKind::InlineFuncItem);
        self.scopes.open_scope();
        for param in self.param_list()? {
            self.ast.add_child(item, param);
        }
        self.scopes.offer_scope();
        let ret = self.type_declaration()?;
        self.add_opt(item, ret);
        let body = self.enclosed_expr()?;
        self.ast.add_child(item, body);
        self.scopes.close_scope()?;
        Ok(item)
    }

    /// Name of a computed constructor: a literal name or an enclosed expression.
    fn constructor_name(&mut self, ncname_only: bool) -> ParseResult {
        if self.accept("{") {
            let expr = self.expr()?;
            self.expect("}")?;
            return Ok(expr);
        }
        let name = if ncname_only { self.ncname()? } else { self.eqname()? };
        Ok(self.leaf(AstKind::QNm, name))
    }

    fn content_sequence(&mut self) -> ParseResult {
        let content = self.ast.create(AstKind::ContentSequence);
        self.expect("{")?;
        if !self.accept("}") {
            let expr = self.expr()?;
            self.expect("}")?;
            self.ast.add_child(content, expr);
        }
        Ok(content)
    }

    fn computed_constructor(&mut self) -> Result<Option<NodeId>, Error> {
        let simple = [
            ("document", AstKind::CompDocumentConstructor),
            ("text", AstKind::CompTextConstructor),
            ("comment", AstKind::CompCommentConstructor),
        ];
        for (keyword, kind) in simple {
            if self.computed_constructor_ahead(keyword, false) {
                self.expect(keyword)?;
                let content = self.content_sequence()?;
                return Ok(Some(self.ast.node(kind, &[content])));
            }
        }
        let named = [
            ("element", AstKind::CompElementConstructor, false),
            ("attribute", AstKind::CompAttributeConstructor, false),
            ("namespace", AstKind::CompNamespaceConstructor, true),
            ("processing-instruction", AstKind::CompPIConstructor, true),
        ];
        for (keyword, kind, ncname_only) in named {
            if self.computed_constructor_ahead(keyword, true) {
                self.expect(keyword)?;
                let name = self.constructor_name(ncname_only)?;
                let content = self.content_sequence()?;
                return Ok(Some(self.ast.node(kind, &[name, content])));
            }
        }
        Ok(None)
    }

    fn direct_constructor(&mut self) -> ParseResult {
        if self.tok.attempt("<!--") {
            let text = self.tok.la_until("-->").ok_or_else(|| self.tok.expected(&["-->"]))?;
            self.tok.consume(&text);
            self.tok.attempt("-->");
            return Ok(self.leaf(AstKind::DirCommentConstructor, text.text));
        }
        if self.tok.attempt("<?") {
            let target = self.tok.ncname_at(self.tok.position()).ok_or_else(|| self.tok.expected(&["NCName"]))?;
            self.tok.consume(&target);
            let content = self.tok.la_until("?>").ok_or_else(|| self.tok.expected(&["?>"]))?;
            self.tok.consume(&content);
            self.tok.attempt("?>");
            let pi = self.leaf(AstKind::DirPIConstructor, target.text);
            let content = self.leaf(AstKind::Str, content.text.trim_start());
            self.ast.add_child(pi, content);
            return Ok(pi);
        }
        if !self.tok.attempt("<") {
            return self.fail(&["<"]);
        }
        self.direct_element()
    }

    fn direct_element(&mut self) -> ParseResult {
        let name = self.tok.qname_at(self.tok.position()).ok_or_else(|| self.tok.expected(&["element name"]))?;
        self.tok.consume(&name);
        let element = self.leaf(AstKind::DirElementConstructor, name.text.as_str());
        let content = self.ast.create(AstKind::ContentSequence);
        loop {
            self.tok.skip_ws();
            if self.tok.attempt("/>") {
                self.ast.add_child(element, content);
                return Ok(element);
            }
            if self.tok.attempt(">") {
                break;
            }
            let attr = self.direct_attribute()?;
            self.ast.add_child(element, attr);
        }
        loop {
            if self.tok.attempt("</") {
                let end = self.tok.qname_at(self.tok.position()).filter(|t| t.text == name.text);
                let Some(end) = end else { return self.fail(&[format!("</{}>", name.text).as_str()]) };
                self.tok.consume(&end);
                self.expect(">")?;
                break;
            }
            if let Some(text) = self.tok.la_elem_content()? {
                self.tok.consume(&text);
                // Boundary whitespace is stripped.
                if !text.text.trim().is_empty() {
                    let text = self.leaf(AstKind::Str, text.text);
                    self.ast.add_child(content, text);
                }
                continue;
            }
            if self.tok.attempt("<![CDATA[") {
                let text = self.tok.la_until("]]>").ok_or_else(|| self.tok.expected(&["]]>"]))?;
                self.tok.consume(&text);
                self.tok.attempt("]]>");
                let text = self.leaf(AstKind::Str, text.text);
                self.ast.add_child(content, text);
                continue;
            }
            if self.tok.la("<").is_some() {
                let nested = self.direct_constructor()?;
                self.ast.add_child(content, nested);
                continue;
            }
            if self.tok.la("{").is_some() {
                let expr = self.enclosed_expr()?;
                self.ast.add_child(content, expr);
                continue;
            }
            return self.fail(&["</", "{", "<"]);
        }
        self.ast.add_child(element, content);
        Ok(element)
    }

    fn direct_attribute(&mut self) -> ParseResult {
        let name = self.tok.qname_at(self.tok.position()).ok_or_else(|| self.tok.expected(&["attribute", ">", "/>"]))?;
        self.tok.consume(&name);
        self.expect("=")?;
        self.tok.skip_ws();
        let quote = match self.tok.peek_skip_ws() {
            Some(q @ ('"' | '\'')) => q,
            _ => return self.fail(&["\"", "'"]),
        };
        let quote_str = quote.to_string();
        self.tok.attempt(&quote_str);
        let attr = self.leaf(AstKind::DirAttributeConstructor, name.text);
        loop {
            if let Some(text) = self.tok.la_attr_content(quote)? {
                self.tok.consume(&text);
                let text = self.leaf(AstKind::Str, text.text);
                self.ast.add_child(attr, text);
            }
            if self.tok.attempt(&quote_str) {
                return Ok(attr);
            }
            if self.tok.la("{").is_none() {
                return self.fail(&[quote_str.as_str(), "{"]);
            }
            let expr = self.enclosed_expr()?;
            self.ast.add_child(attr, expr);
        }
    }

    // ---- types ---------------------------------------------------------------------------

    fn sequence_type(&mut self) -> ParseResult {
        if self.accept2("empty-sequence", "(") {
            self.expect(")")?;
            let empty = self.ast.create(AstKind::EmptySequenceType);
            return Ok(self.ast.node(AstKind::SequenceType, &[empty]));
        }
        let item = self.item_type()?;
        let ty = self.ast.node(AstKind::SequenceType, &[item]);
        let cardinality = if self.accept("?") {
            Some(AstKind::CardinalityZeroOrOne)
        } else if self.accept("*") {
            Some(AstKind::CardinalityZeroOrMany)
        } else if self.accept("+") {
            Some(AstKind::CardinalityOneOrMany)
        } else {
            None
        };
        if let Some(kind) = cardinality {
            let c = self.ast.create(kind);
            self.ast.add_child(ty, c);
        }
        Ok(ty)
    }

    fn single_type(&mut self) -> ParseResult {
        let name = self.eqname()?;
        let atomic = self.leaf(AstKind::AtomicOrUnionType, name);
        let ty = self.ast.node(AstKind::SequenceType, &[atomic]);
        if self.accept("?") {
            let c = self.ast.create(AstKind::CardinalityZeroOrOne);
            self.ast.add_child(ty, c);
        }
        Ok(ty)
    }

    fn item_type(&mut self) -> ParseResult {
        if let Some(test) = self.kind_test()? {
            return Ok(test);
        }
        if self.accept2("item", "(") {
            self.expect(")")?;
            return Ok(self.ast.create(AstKind::ItemType));
        }
        if self.accept2("function", "(") {
            if self.accept("*") {
                self.expect(")")?;
                return Ok(self.ast.create(AstKind::AnyFunctionType));
            }
            let ty = self.ast.create(AstKind::TypedFunctionType);
            if !self.la(")") {
                loop {
                    let param = self.sequence_type()?;
                    self.ast.add_child(ty, param);
                    if !self.accept(",") {
                        break;
                    }
                }
            }
            self.expect(")")?;
            self.expect("as")?;
            let ret = self.sequence_type()?;
            self.ast.add_child(ty, ret);
            return Ok(ty);
        }
        if self.accept("(") {
            let ty = self.item_type()?;
            self.expect(")")?;
            return Ok(ty);
        }
        let name = self.eqname()?;
        Ok(self.leaf(AstKind::AtomicOrUnionType, name))
    }

    fn kind_test(&mut self) -> Result<Option<NodeId>, Error> {
        let Some(&(name, kind)) = KIND_TESTS.iter().find(|(n, _)| self.la2(n, "(")) else {
            return Ok(None);
        };
        self.expect(name)?;
        self.expect("(")?;
        let test = self.ast.create(kind);
        if !self.la(")") {
            match kind {
                AstKind::DocumentType => {
                    if let Some(inner) = self.kind_test()? {
                        self.ast.add_child(test, inner);
                    }
                }
                AstKind::ElementType | AstKind::AttributeType => {
                    let name = if self.accept("*") { "*".to_string() } else { self.eqname()? };
                    let name = self.leaf(AstKind::QNm, name);
                    self.ast.add_child(test, name);
                    if self.accept(",") {
                        let type_name = self.eqname()?;
                        let type_name = self.leaf(AstKind::AtomicOrUnionType, type_name);
                        self.ast.add_child(test, type_name);
                        if self.accept("?") {
                            self.ast.set_property(test, "nillable", "true");
                        }
                    }
                }
                AstKind::SchemaElementType | AstKind::SchemaAttributeType => {
                    let name = self.eqname()?;
                    self.ast.set_value(test, name);
                }
                AstKind::PIType => {
                    let target = match self.tok.la_string_skip_ws()? {
                        Some(t) => {
                            self.tok.consume(&t);
                            t.text
                        }
                        None => self.ncname()?,
                    };
                    self.ast.set_value(test, target);
                }
                _ => {}
            }
        }
        self.expect(")")?;
        Ok(Some(test))
    }

    // ---- update facility -----------------------------------------------------------------

    fn node_or_nodes(&mut self) -> Result<(), Error> {
        if !self.accept("nodes") {
            self.expect("node")?;
        }
        Ok(())
    }

    fn insert(&mut self) -> ParseResult {
        self.expect("insert")?;
        self.node_or_nodes()?;
        let source = self.expr_single()?;
        let kind = if self.accept2("as", "first") {
            self.expect("into")?;
            AstKind::InsertFirst
        } else if self.accept2("as", "last") {
            self.expect("into")?;
            AstKind::InsertLast
        } else if self.accept("into") {
            AstKind::InsertInto
        } else if self.accept("after") {
            AstKind::InsertAfter
        } else if self.accept("before") {
            AstKind::InsertBefore
        } else {
            return self.fail(&["as first into", "as last into", "into", "after", "before"]);
        };
        let target = self.expr_single()?;
        let position = self.ast.create(kind);
        Ok(self.ast.node(AstKind::InsertExpr, &[position, source, target]))
    }

    fn delete(&mut self) -> ParseResult {
        self.expect("delete")?;
        self.node_or_nodes()?;
        let target = self.expr_single()?;
        Ok(self.ast.node(AstKind::DeleteExpr, &[target]))
    }

    fn rename(&mut self) -> ParseResult {
        self.expect("rename")?;
        self.expect("node")?;
        let target = self.expr_single()?;
        self.expect("as")?;
        let name = self.expr_single()?;
        Ok(self.ast.node(AstKind::RenameExpr, &[target, name]))
    }

    fn replace(&mut self) -> ParseResult {
        self.expect("replace")?;
        let value_of = self.accept2("value", "of");
        self.expect("node")?;
        let target = self.expr_single()?;
        self.expect("with")?;
        let replacement = self.expr_single()?;
        let kind = if value_of { AstKind::ReplaceValueExpr } else { AstKind::ReplaceNodeExpr };
        Ok(self.ast.node(kind, &[target, replacement]))
    }

    fn transform(&mut self) -> ParseResult {
        self.expect("copy")?;
        let transform = self.ast.create(AstKind::TransformExpr);
        let mut opened = 0;
        loop {
            let name = self.var_name()?;
            self.expect(":=")?;
            let source = self.expr_single()?;
            self.scopes.open_scope();
            opened += 1;
            let var = self.declare_var(&name)?;
            self.scopes.offer_scope();
            let binding = self.ast.node(AstKind::CopyVariableBinding, &[var, source]);
            self.ast.add_child(transform, binding);
            if !self.accept(",") {
                break;
            }
        }
        self.expect("modify")?;
        let modify = self.expr_single()?;
        self.expect("return")?;
        let ret = self.expr_single()?;
        self.ast.add_child(transform, modify);
        self.ast.add_child(transform, ret);
        self.close_scopes(opened)?;
        Ok(transform)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    fn body(query: &str) -> String {
        let ast = parse(query).unwrap();
        let root = ast.root().unwrap();
        let main = ast.child(root, 0).unwrap();
        let body = ast.child(main, 1).unwrap();
        ast.display(ast.child(body, 0).unwrap())
    }

    #[test]
    fn arithmetic_precedence() {
        assert_eq!(body("1 + 2 * 3"), "ArithmeticExpr(AddOp, Int[1], ArithmeticExpr(MultiplyOp, Int[2], Int[3]))");
    }

    #[test]
    fn unary_minus_multiplies() {
        assert_eq!(body("-1"), "ArithmeticExpr(MultiplyOp, Int[-1], Int[1])");
        assert_eq!(body("--1"), "Int[1]");
    }

    #[test]
    fn for_variable_is_suffixed() {
        assert_eq!(
            body("for $x in (1, 2) return $x"),
            "FlowrExpr(ForClause(TypedVariableBinding(Variable[x;0]), SequenceExpr(Int[1], Int[2])), \
             ReturnClause(VariableRef[x;0]))"
        );
    }

    #[test]
    fn binding_expression_sees_outer_variable() {
        assert_eq!(
            body("let $x := 1 return for $x in $x return $x"),
            "FlowrExpr(LetClause(TypedVariableBinding(Variable[x;0]), Int[1]), \
             ReturnClause(FlowrExpr(ForClause(TypedVariableBinding(Variable[x;1]), VariableRef[x;0]), \
             ReturnClause(VariableRef[x;1]))))"
        );
    }

    #[test]
    fn concat_operator_becomes_call() {
        assert_eq!(body("'a' || 'b' || 'c'"), "FunctionCall[fn:concat](Str[a], Str[b], Str[c])");
    }

    #[test]
    fn group_by_with_assignment_desugars_to_let() {
        let out = body("for $x in (1, 2) group by $k := $x mod 2 return $k");
        assert!(out.contains("LetClause(TypedVariableBinding(Variable[k;1])"));
        assert!(out.contains("GroupByClause(GroupBySpec(VariableRef[k;1]))"));
    }

    #[test]
    fn sliding_window_requires_end() {
        let err = parse("for sliding window $w in (1, 2) start when true() return $w").unwrap_err();
        assert_eq!(err.code, ErrorCode::XPST0003);
        let out = body("for tumbling window $w in (1, 2) start $s when true() only end $e when false() return $w");
        assert!(out.starts_with("FlowrExpr(TumblingWindowClause("));
        assert!(out.contains("WindowEndCondition(WindowVars(CurrentItem(Variable[e;"));
    }

    #[test]
    fn duplicate_positional_variable() {
        let err = parse("for $x at $x in (1, 2) return $x").unwrap_err();
        assert_eq!(err.code, ErrorCode::XQST0049);
    }

    #[test]
    fn unknown_variable() {
        let err = parse("$nope").unwrap_err();
        assert_eq!(err.code, ErrorCode::XPST0008);
        assert_eq!(err.message, "Did not find variable declaration: $nope");
    }

    #[test]
    fn keyword_requires_trailing_whitespace() {
        assert_eq!(parse("5 mod(2)").unwrap_err().code, ErrorCode::XPST0003);
        assert_eq!(body("5 mod 2"), "ArithmeticExpr(ModulusOp, Int[5], Int[2])");
    }

    #[test]
    fn direct_constructor_with_enclosed_expression() {
        assert_eq!(
            body("<a x=\"1{2}\">t<b/>{3}</a>"),
            "DirElementConstructor[a](DirAttributeConstructor[x](Str[1], Int[2]), \
             ContentSequence(Str[t], DirElementConstructor[b](ContentSequence), Int[3]))"
        );
    }

    #[test]
    fn mismatched_end_tag() {
        assert_eq!(parse("<a></b>").unwrap_err().code, ErrorCode::XPST0003);
    }

    #[test]
    fn path_with_predicates() {
        assert_eq!(
            body("/a//b[1]"),
            "PathExpr(RootPath, StepExpr(AxisSpec[child], NameTest[a]), \
             StepExpr(AxisSpec[descendant-or-self], AnyKindType), \
             StepExpr(AxisSpec[child], NameTest[b], Predicate(Int[1])))"
        );
    }

    #[test]
    fn library_module_and_prolog() {
        let ast = parse(
            "module namespace m = 'urn:m'; declare variable $m:v := 1; \
             declare function m:f($a) { $a + $m:v };",
        )
        .unwrap();
        let root = ast.root().unwrap();
        assert_eq!(
            ast.display(root),
            "XQuery(LibraryModule(NamespaceDeclaration[m](AnyURI[urn:m]), Prolog(\
             VariableDeclaration(Variable[m:v], Int[1]), \
             FunctionDecl[m:f](TypedVariableDeclaration(Variable[a;0]), \
             ArithmeticExpr(AddOp, VariableRef[a;0], VariableRef[m:v])))))"
        );
    }

    #[test]
    fn update_expressions() {
        assert_eq!(
            body("insert node <a/> as first into /"),
            "InsertExpr(InsertFirst, DirElementConstructor[a](ContentSequence), PathExpr(RootPath))"
        );
        let out = body("copy $c := <a/> modify delete node $c return $c");
        assert!(out.starts_with("TransformExpr(CopyVariableBinding(Variable[c;0]"));
    }

    #[test]
    fn catch_declares_implicit_variables() {
        let out = body("try { 1 } catch * { $err:code }");
        assert!(out.contains("CatchVar(Variable[err:code;0], Variable[err:description;1], Variable[err:value;2])"));
        assert!(out.ends_with("VariableRef[err:code;0]))"));
    }
}
