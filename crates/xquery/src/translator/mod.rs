//! Translation of an optimized AST into the runtime plan.
//!
//! The translator walks one module tree. Prolog declarations become globals and user
//! functions, pipe-form operator chains become [`Operator`](crate::runtime::Operator) trees
//! and everything else becomes [`Expr`](crate::runtime::Expr) values. Variable bindings go
//! through the [`VariableTable`], which assigns tuple columns once the whole module is done.

pub mod variables;

pub use variables::{FrameKind, VariableTable};

use crate::ast::{Ast, AstKind, NodeId};
use crate::compile::CompileOptions;
use crate::consts::{CTX_ITEM, CTX_LAST, CTX_POSITION, FNS, PREDECLARED_NAMESPACES, XS};
use crate::error::{Error, ErrorCode};
use crate::model::{NodeKind, QName};
use crate::module::{Module, ModuleKind, ModuleResolver};
use crate::runtime::arith::{Arithmetic, ArithmeticOp};
use crate::runtime::compare::{Comparison, ComparisonMode, ComparisonOp, NodeComparison, NodeComparisonOp};
use crate::runtime::construct::{ConstructorKind, ConstructorName, NodeConstructor};
use crate::runtime::control::{
    CatchClause, ErrorTest, Quantified, Quantifier, Switch, SwitchCase, TryCatch, TypeCase, TypeSwitch,
};
use crate::runtime::expr::{Cast, Filter, If, InstanceOf, Literal, Logical, LogicalOp, NodeSet, Range, Sequence, SetOp, Treat};
use crate::runtime::functions::{FunctionCall, ResolveError, UserCall, UserFunction};
use crate::runtime::group::GroupBy;
use crate::runtime::join::Join;
use crate::runtime::path::{Axis, AxisStep, NodeTest, Path, Root};
use crate::runtime::pipeline::{Count, ForBind, LetBind, OrderBy, OrderSpec, Pipeline, Select, Start};
use crate::runtime::types::{AtomicType, ItemTest, Occurrence, SequenceType};
use crate::runtime::updating::{Delete, Insert, InsertPosition, Rename, ReplaceNode, ReplaceValue};
use crate::runtime::variable::{GlobalVar, Slot};
use crate::runtime::window::{WindowBind, WindowCondition, WindowKind, WindowVars};
use crate::runtime::{ExprRef, OperatorRef};
use crate::xdm::{XdmAtomicValue, XdmItem};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// Pluggable translation strategy of a compile chain.
pub trait Translator: Send + Sync {
    fn translate(&self, ast: &Ast, options: &CompileOptions, resolver: &dyn ModuleResolver) -> Result<Module, Error>;
}

/// Translates pipe-form operator chains into pull-based operators.
#[derive(Debug, Default, Clone, Copy)]
pub struct PipelineTranslator;

impl Translator for PipelineTranslator {
    fn translate(&self, ast: &Ast, options: &CompileOptions, resolver: &dyn ModuleResolver) -> Result<Module, Error> {
        let root = ast.root().ok_or_else(|| Error::illegal_state("translating an empty tree"))?;
        let mut translation = Translation::new(ast, options, resolver);
        let module = translation.module(root)?;
        translation.vars.resolve_positions()?;
        debug!(
            globals = translation.vars.globals().len(),
            functions = module.functions().count(),
            imports = translation.imports.len(),
            "translated module"
        );
        Ok(module)
    }
}

type TResult<T> = Result<T, Error>;

/// A user function whose body is translated after every global is known.
struct PendingBody {
    decl: NodeId,
    func: Arc<UserFunction>,
    params: Vec<Arc<Slot>>,
}

fn is_item_type(kind: AstKind) -> bool {
    matches!(
        kind,
        AstKind::ItemType
            | AstKind::AtomicOrUnionType
            | AstKind::AnyKindType
            | AstKind::DocumentType
            | AstKind::ElementType
            | AstKind::AttributeType
            | AstKind::SchemaElementType
            | AstKind::SchemaAttributeType
            | AstKind::PIType
            | AstKind::CommentType
            | AstKind::TextType
            | AstKind::NamespaceNodeType
            | AstKind::AnyFunctionType
            | AstKind::TypedFunctionType
    )
}

fn comparison_op(kind: AstKind) -> Option<(ComparisonMode, ComparisonOp)> {
    use ComparisonMode::{General, Value};
    Some(match kind {
        AstKind::GeneralCompEQ => (General, ComparisonOp::Eq),
        AstKind::GeneralCompNE => (General, ComparisonOp::Ne),
        AstKind::GeneralCompLT => (General, ComparisonOp::Lt),
        AstKind::GeneralCompLE => (General, ComparisonOp::Le),
        AstKind::GeneralCompGT => (General, ComparisonOp::Gt),
        AstKind::GeneralCompGE => (General, ComparisonOp::Ge),
        AstKind::ValueCompEQ => (Value, ComparisonOp::Eq),
        AstKind::ValueCompNE => (Value, ComparisonOp::Ne),
        AstKind::ValueCompLT => (Value, ComparisonOp::Lt),
        AstKind::ValueCompLE => (Value, ComparisonOp::Le),
        AstKind::ValueCompGT => (Value, ComparisonOp::Gt),
        AstKind::ValueCompGE => (Value, ComparisonOp::Ge),
        _ => return None,
    })
}

fn non_empty(ns: &str) -> Option<&str> {
    (!ns.is_empty()).then_some(ns)
}

struct Translation<'a> {
    ast: &'a Ast,
    options: &'a CompileOptions,
    resolver: &'a dyn ModuleResolver,
    vars: VariableTable,
    namespaces: HashMap<String, String>,
    default_function_ns: String,
    default_element_ns: Option<String>,
    empty_greatest: bool,
    functions: HashMap<(QName, usize), Arc<UserFunction>>,
    pending: Vec<PendingBody>,
    context_item: Option<Arc<GlobalVar>>,
    imports: Vec<Arc<Module>>,
}

impl<'a> Translation<'a> {
    fn new(ast: &'a Ast, options: &'a CompileOptions, resolver: &'a dyn ModuleResolver) -> Self {
        let mut namespaces: HashMap<String, String> =
            PREDECLARED_NAMESPACES.iter().map(|(p, u)| ((*p).to_string(), (*u).to_string())).collect();
        namespaces.extend(options.namespaces.iter().map(|(p, u)| (p.clone(), u.clone())));
        Self {
            ast,
            options,
            resolver,
            vars: VariableTable::new(),
            namespaces,
            default_function_ns: options.default_function_namespace.clone(),
            default_element_ns: None,
            empty_greatest: false,
            functions: HashMap::new(),
            pending: Vec::new(),
            context_item: None,
            imports: Vec::new(),
        }
    }

    fn child(&self, node: NodeId, index: usize) -> TResult<NodeId> {
        self.ast
            .child(node, index)
            .ok_or_else(|| Error::illegal_state(format!("{} has no child {index}", self.ast.kind(node))))
    }

    fn value(&self, node: NodeId) -> TResult<&'a str> {
        let ast = self.ast;
        ast.value(node).ok_or_else(|| Error::illegal_state(format!("{} has no value", ast.kind(node))))
    }

    // ---- names ---------------------------------------------------------------------------

    /// Expand `prefix:local`, `Q{uri}local` or `local`; the latter lands in `default`.
    fn expand_qname(&self, lexical: &str, default: Option<&str>) -> TResult<QName> {
        if let Some(rest) = lexical.strip_prefix("Q{") {
            let (uri, local) =
                rest.split_once('}').ok_or_else(|| Error::parse(&["}"], lexical))?;
            return Ok(QName::new(non_empty(uri), None, local));
        }
        match lexical.split_once(':') {
            Some((prefix, local)) => {
                let uri = self.namespaces.get(prefix).ok_or_else(|| {
                    Error::from_code(ErrorCode::XPST0081, format!("namespace prefix {prefix} is not bound"))
                })?;
                Ok(QName::new(non_empty(uri), Some(prefix), local))
            }
            None => Ok(QName::new(default, None, lexical)),
        }
    }

    fn function_name(&self, lexical: &str) -> TResult<QName> {
        self.expand_qname(lexical, non_empty(&self.default_function_ns))
    }

    fn atomic_type(&self, lexical: &str) -> TResult<AtomicType> {
        let name = self.expand_qname(lexical, self.default_element_ns.as_deref())?;
        let unknown = || Error::from_code(ErrorCode::XPST0051, format!("unknown atomic type {lexical}"));
        if name.ns_uri.as_deref() != Some(XS) {
            return Err(unknown());
        }
        AtomicType::from_local(&name.local).ok_or_else(unknown)
    }

    // ---- modules and prolog --------------------------------------------------------------

    fn module(&mut self, root: NodeId) -> TResult<Module> {
        if self.ast.kind(root) != AstKind::XQuery {
            return Err(Error::illegal_state(format!("cannot translate {} as a module", self.ast.kind(root))));
        }
        let module = self.child(root, 0)?;
        match self.ast.kind(module) {
            AstKind::MainModule => {
                self.prolog(self.child(module, 0)?)?;
                let body = self.child(self.child(module, 1)?, 0)?;
                let body = self.lower_expr(body)?;
                let functions = std::mem::take(&mut self.functions).into_values();
                Ok(Module::new(ModuleKind::Main { body }, functions))
            }
            AstKind::LibraryModule => {
                let decl = self.child(module, 0)?;
                let prefix = self.value(decl)?;
                let namespace = self.value(self.child(decl, 0)?)?.to_string();
                self.namespaces.insert(prefix.to_string(), namespace.clone());
                self.prolog(self.child(module, 1)?)?;
                let functions = std::mem::take(&mut self.functions).into_values();
                Ok(Module::new(ModuleKind::Library { namespace }, functions))
            }
            other => Err(Error::illegal_state(format!("unexpected module kind {other}"))),
        }
    }

    /// Setters, imports and function signatures first, then globals in declaration order,
    /// then function bodies.
    fn prolog(&mut self, prolog: NodeId) -> TResult<()> {
        let ast = self.ast;
        for &decl in ast.children(prolog) {
            self.declare(decl)?;
        }
        for &decl in ast.children(prolog) {
            match ast.kind(decl) {
                AstKind::VariableDeclaration => self.variable_declaration(decl)?,
                AstKind::ContextItemDeclaration => self.context_item_init(decl)?,
                _ => {}
            }
        }
        for pending in std::mem::take(&mut self.pending) {
            self.function_body(&pending)?;
        }
        Ok(())
    }

    fn declare(&mut self, decl: NodeId) -> TResult<()> {
        let ast = self.ast;
        match ast.kind(decl) {
            AstKind::NamespaceDeclaration => {
                let prefix = self.value(decl)?;
                let uri = self.value(self.child(decl, 0)?)?;
                self.namespaces.insert(prefix.to_string(), uri.to_string());
            }
            AstKind::DefaultElementNamespace => {
                self.default_element_ns = non_empty(self.value(decl)?).map(str::to_string);
            }
            AstKind::DefaultFunctionNamespace => self.default_function_ns = self.value(decl)?.to_string(),
            AstKind::EmptyOrderDeclaration => self.empty_greatest = self.value(decl)? == "greatest",
            AstKind::ModuleImport => {
                let uri = self.value(decl)?;
                let module = self.resolver.resolve(uri).ok_or_else(|| {
                    Error::from_code(ErrorCode::XQST0059, format!("no module registered for namespace {uri}"))
                })?;
                if let Some(prefix) = ast.property(decl, "prefix") {
                    self.namespaces.insert(prefix.to_string(), uri.to_string());
                }
                debug!(namespace = uri, functions = module.functions().count(), "imported module");
                self.imports.push(module);
            }
            AstKind::SchemaImport => {
                if let Some(prefix) = ast.property(decl, "prefix").filter(|p| !p.is_empty()) {
                    self.namespaces.insert(prefix.to_string(), self.value(decl)?.to_string());
                }
            }
            AstKind::ContextItemDeclaration => {
                let ty = match ast.child(decl, 0).filter(|c| is_item_type(ast.kind(*c))) {
                    Some(item) => Some(SequenceType::new(self.item_test(item)?, Occurrence::One)),
                    None => None,
                };
                let external = ast.child_of_kind(decl, AstKind::ExternalVariable).is_some();
                self.context_item = Some(self.vars.declare_context_item(external, ty)?);
            }
            AstKind::FunctionDecl => self.declare_function(decl)?,
            AstKind::VariableDeclaration => {}
            other => trace!(declaration = %other, "prolog setting without effect"),
        }
        Ok(())
    }

    fn declare_function(&mut self, decl: NodeId) -> TResult<()> {
        let ast = self.ast;
        let name = self.function_name(self.value(decl)?)?;
        let mut params = Vec::new();
        let mut ret = None;
        let mut updating = false;
        for &c in ast.children(decl) {
            match ast.kind(c) {
                AstKind::Annotation => updating |= ast.value(c) == Some("updating"),
                AstKind::TypedVariableDeclaration => {
                    let var = self.value(self.child(c, 0)?)?;
                    let ty = ast.child_of_kind(c, AstKind::SequenceType).map(|t| self.sequence_type(t)).transpose()?;
                    params.push(Arc::new(Slot::new(var, ty)));
                }
                AstKind::SequenceType => ret = Some(self.sequence_type(c)?),
                _ => {}
            }
        }
        let key = (name.clone(), params.len());
        if self.functions.contains_key(&key) {
            return Err(Error::from_code(
                ErrorCode::XQST0034,
                format!("function {name} with {} parameters is declared twice", params.len()),
            ));
        }
        let func = Arc::new(UserFunction::new(name, params.clone(), ret, updating));
        self.functions.insert(key, func.clone());
        self.pending.push(PendingBody { decl, func, params });
        Ok(())
    }

    fn variable_declaration(&mut self, decl: NodeId) -> TResult<()> {
        let ast = self.ast;
        let var = ast
            .child_of_kind(decl, AstKind::Variable)
            .ok_or_else(|| Error::illegal_state("variable declaration without name"))?;
        let name = self.value(var)?;
        let ty = ast.child_of_kind(decl, AstKind::SequenceType).map(|t| self.sequence_type(t)).transpose()?;
        let external = ast.child_of_kind(decl, AstKind::ExternalVariable).is_some();
        let init = ast.last_child(decl).filter(|c| {
            !matches!(
                ast.kind(*c),
                AstKind::Annotation | AstKind::Variable | AstKind::SequenceType | AstKind::ExternalVariable
            )
        });
        let init = match init {
            Some(init) => {
                self.vars.push_frame(FrameKind::Query);
                let init = self.lower_expr(init)?;
                self.vars.pop_frame()?;
                Some(init)
            }
            None => None,
        };
        let global = self.vars.declare_global(name, external, ty)?;
        if let Some(init) = init {
            global.set_init(init)?;
        }
        trace!(name, external, "declared global");
        Ok(())
    }

    fn context_item_init(&mut self, decl: NodeId) -> TResult<()> {
        let ast = self.ast;
        let Some(init) = ast
            .last_child(decl)
            .filter(|c| !is_item_type(ast.kind(*c)) && ast.kind(*c) != AstKind::ExternalVariable)
        else {
            return Ok(());
        };
        self.vars.push_frame(FrameKind::ContextItem);
        let init = self.lower_expr(init)?;
        self.vars.pop_frame()?;
        let global = self.context_item.clone().ok_or_else(|| Error::illegal_state("context item was not declared"))?;
        global.set_init(init)
    }

    fn function_body(&mut self, pending: &PendingBody) -> TResult<()> {
        let body = self
            .ast
            .last_child(pending.decl)
            .ok_or_else(|| Error::illegal_state("function declaration without body"))?;
        if self.ast.kind(body) == AstKind::ExternalVariable {
            return Err(Error::not_implemented("external functions"));
        }
        self.vars.push_frame(FrameKind::Function);
        for param in &pending.params {
            self.vars.attach(param.clone());
        }
        let body = self.lower_expr(body)?;
        self.vars.unbind_all(pending.params.len())?;
        self.vars.pop_frame()?;
        trace!(function = %pending.func.name(), "translated function body");
        pending.func.set_body(body)
    }

    // ---- expressions ---------------------------------------------------------------------

    fn lower_all(&mut self, nodes: &[NodeId]) -> TResult<Vec<ExprRef>> {
        nodes.iter().map(|n| self.lower_expr(*n)).collect()
    }

    fn lower_child(&mut self, node: NodeId, index: usize) -> TResult<ExprRef> {
        let child = self.child(node, index)?;
        self.lower_expr(child)
    }

    fn lower_expr(&mut self, node: NodeId) -> TResult<ExprRef> {
        let ast = self.ast;
        let expr: ExprRef = match ast.kind(node) {
            AstKind::Int => {
                let text = self.value(node)?;
                let value = text
                    .parse::<i64>()
                    .map_err(|_| Error::from_code(ErrorCode::FOAR0002, format!("integer literal {text} out of range")))?;
                Arc::new(Literal::new(vec![XdmItem::from(value)]))
            }
            kind @ (AstKind::Dec | AstKind::Dbl) => {
                let text = self.value(node)?;
                let value = text.parse::<f64>().map_err(|_| Error::parse(&["numeric literal"], text))?;
                let atom = if kind == AstKind::Dec { XdmAtomicValue::Decimal(value) } else { XdmAtomicValue::Double(value) };
                Arc::new(Literal::new(vec![XdmItem::Atomic(atom)]))
            }
            AstKind::Str => Arc::new(Literal::new(vec![XdmItem::from(self.value(node)?)])),
            AstKind::EmptySequence => Arc::new(Literal::empty()),
            AstKind::VariableRef => self.vars.resolve(self.value(node)?)?,
            AstKind::ContextItemExpr => self.vars.resolve(CTX_ITEM)?,
            AstKind::SequenceExpr => Arc::new(Sequence { items: self.lower_all(ast.children(node))? }),
            AstKind::OrderedExpr | AstKind::UnorderedExpr => self.lower_child(node, 0)?,
            AstKind::IfExpr => Arc::new(If {
                condition: self.lower_child(node, 0)?,
                then: self.lower_child(node, 1)?,
                otherwise: self.lower_child(node, 2)?,
            }),
            kind @ (AstKind::OrExpr | AstKind::AndExpr) => Arc::new(Logical {
                op: if kind == AstKind::OrExpr { LogicalOp::Or } else { LogicalOp::And },
                left: self.lower_child(node, 0)?,
                right: self.lower_child(node, 1)?,
            }),
            AstKind::ComparisonExpr => self.comparison(node)?,
            AstKind::RangeExpr => Arc::new(Range { from: self.lower_child(node, 0)?, to: self.lower_child(node, 1)? }),
            AstKind::ArithmeticExpr => self.arithmetic(node)?,
            kind @ (AstKind::UnionExpr | AstKind::IntersectExpr | AstKind::ExceptExpr) => Arc::new(NodeSet {
                op: match kind {
                    AstKind::UnionExpr => SetOp::Union,
                    AstKind::IntersectExpr => SetOp::Intersect,
                    _ => SetOp::Except,
                },
                left: self.lower_child(node, 0)?,
                right: self.lower_child(node, 1)?,
            }),
            AstKind::InstanceofExpr => Arc::new(InstanceOf {
                expr: self.lower_child(node, 0)?,
                ty: self.sequence_type(self.child(node, 1)?)?,
            }),
            AstKind::TreatExpr => {
                Arc::new(Treat { expr: self.lower_child(node, 0)?, ty: self.sequence_type(self.child(node, 1)?)? })
            }
            kind @ (AstKind::CastExpr | AstKind::CastableExpr) => {
                let ty = self.child(node, 1)?;
                Arc::new(Cast {
                    expr: self.lower_child(node, 0)?,
                    target: self.atomic_type(self.value(self.child(ty, 0)?)?)?,
                    allow_empty: ast.child_of_kind(ty, AstKind::CardinalityZeroOrOne).is_some(),
                    castable: kind == AstKind::CastableExpr,
                })
            }
            AstKind::FilterExpr => self.filter(node)?,
            AstKind::FunctionCall => self.function_call(node)?,
            AstKind::QuantifiedExpr => self.quantified(node)?,
            AstKind::SwitchExpr => self.switch(node)?,
            AstKind::TypeSwitch => self.typeswitch(node)?,
            AstKind::TryCatchExpr => self.try_catch(node)?,
            AstKind::ExtensionExpr => {
                let body = ast.children(node).iter().copied().find(|c| ast.kind(*c) != AstKind::Pragma);
                match body {
                    Some(body) => self.lower_expr(body)?,
                    None => return Err(Error::not_implemented("pragmas without fallback expression")),
                }
            }
            AstKind::ReturnExpr => self.pipeline(node)?,
            AstKind::FlowrExpr => self.flwor(node)?,
            AstKind::InsertExpr => {
                let position = match ast.kind(self.child(node, 0)?) {
                    AstKind::InsertInto => InsertPosition::Into,
                    AstKind::InsertFirst => InsertPosition::AsFirst,
                    AstKind::InsertLast => InsertPosition::AsLast,
                    AstKind::InsertBefore => InsertPosition::Before,
                    AstKind::InsertAfter => InsertPosition::After,
                    other => return Err(Error::illegal_state(format!("{other} is not an insert position"))),
                };
                Arc::new(Insert { position, source: self.lower_child(node, 1)?, target: self.lower_child(node, 2)? })
            }
            AstKind::DeleteExpr => Arc::new(Delete { target: self.lower_child(node, 0)? }),
            AstKind::RenameExpr => {
                Arc::new(Rename { target: self.lower_child(node, 0)?, name: self.lower_child(node, 1)? })
            }
            AstKind::ReplaceNodeExpr => Arc::new(ReplaceNode {
                target: self.lower_child(node, 0)?,
                replacement: self.lower_child(node, 1)?,
            }),
            AstKind::ReplaceValueExpr => {
                Arc::new(ReplaceValue { target: self.lower_child(node, 0)?, value: self.lower_child(node, 1)? })
            }
            AstKind::PathExpr => self.path(node)?,
            AstKind::StepExpr => self.step(node)?,
            AstKind::DirElementConstructor => self.direct_element(node)?,
            AstKind::DirAttributeConstructor => self.direct_attribute(node)?,
            AstKind::DirCommentConstructor
            | AstKind::DirPIConstructor
            | AstKind::CompDocumentConstructor
            | AstKind::CompElementConstructor
            | AstKind::CompAttributeConstructor
            | AstKind::CompNamespaceConstructor
            | AstKind::CompTextConstructor
            | AstKind::CompCommentConstructor
            | AstKind::CompPIConstructor => self.constructor(node)?,
            AstKind::LiteralFuncItem | AstKind::InlineFuncItem | AstKind::DynamicFunctionCallExpr => {
                return Err(Error::not_implemented("function items"));
            }
            AstKind::ValidateExpr => return Err(Error::not_implemented("validate")),
            AstKind::TransformExpr => return Err(Error::not_implemented("transform")),
            other => return Err(Error::illegal_state(format!("{other} is not an expression"))),
        };
        Ok(expr)
    }

    fn comparison(&mut self, node: NodeId) -> TResult<ExprRef> {
        let kind = self.ast.kind(self.child(node, 0)?);
        let left = self.lower_child(node, 1)?;
        let right = self.lower_child(node, 2)?;
        if let Some((mode, op)) = comparison_op(kind) {
            return Ok(Arc::new(Comparison { mode, op, left, right }));
        }
        let op = match kind {
            AstKind::NodeCompIs => NodeComparisonOp::Is,
            AstKind::NodeCompPrecedes => NodeComparisonOp::Precedes,
            AstKind::NodeCompFollows => NodeComparisonOp::Follows,
            other => return Err(Error::illegal_state(format!("{other} is not a comparison operator"))),
        };
        Ok(Arc::new(NodeComparison { op, left, right }))
    }

    fn arithmetic(&mut self, node: NodeId) -> TResult<ExprRef> {
        let op = match self.ast.kind(self.child(node, 0)?) {
            AstKind::AddOp => ArithmeticOp::Add,
            AstKind::SubtractOp => ArithmeticOp::Sub,
            AstKind::MultiplyOp => ArithmeticOp::Mul,
            AstKind::DivideOp => ArithmeticOp::Div,
            AstKind::IDivideOp => ArithmeticOp::IDiv,
            AstKind::ModulusOp => ArithmeticOp::Mod,
            other => return Err(Error::illegal_state(format!("{other} is not an arithmetic operator"))),
        };
        Ok(Arc::new(Arithmetic { op, left: self.lower_child(node, 1)?, right: self.lower_child(node, 2)? }))
    }

    fn filter(&mut self, node: NodeId) -> TResult<ExprRef> {
        let base = self.lower_child(node, 0)?;
        let predicate = self.child(self.child(node, 1)?, 0)?;
        self.predicate(base, predicate)
    }

    /// `base[predicate]`; the predicate sees its own focus.
    fn predicate(&mut self, base: ExprRef, predicate: NodeId) -> TResult<ExprRef> {
        let item = self.vars.bind(CTX_ITEM, None);
        let position = self.vars.bind(CTX_POSITION, None);
        let last = self.vars.bind(CTX_LAST, None);
        let predicate = self.lower_expr(predicate)?;
        self.vars.unbind_all(3)?;
        Ok(Arc::new(Filter { base, predicate, item, position, last }))
    }

    // ---- paths ---------------------------------------------------------------------------

    /// `PathExpr(RootPath?, steps...)`. Steps after the first run under a fresh focus.
    fn path(&mut self, node: NodeId) -> TResult<ExprRef> {
        let ast = self.ast;
        let Some((&first, steps)) = ast.children(node).split_first() else {
            return Err(Error::illegal_state("empty path"));
        };
        let first: ExprRef = if ast.kind(first) == AstKind::RootPath {
            Arc::new(Root { context: self.vars.resolve(CTX_ITEM)? })
        } else {
            self.lower_expr(first)?
        };
        let item = self.vars.bind(CTX_ITEM, None);
        let position = self.vars.bind(CTX_POSITION, None);
        let last = self.vars.bind(CTX_LAST, None);
        let steps = self.lower_all(steps)?;
        self.vars.unbind_all(3)?;
        Ok(Arc::new(Path { first, steps, item, position, last }))
    }

    /// `StepExpr(AxisSpec, test, Predicate*)` against the context item.
    fn step(&mut self, node: NodeId) -> TResult<ExprRef> {
        let ast = self.ast;
        let axis_name = self.value(self.child(node, 0)?)?;
        let axis = Axis::from_name(axis_name)
            .ok_or_else(|| Error::not_implemented(&format!("the {axis_name} axis")))?;
        let test = self.node_test(self.child(node, 1)?, axis)?;
        let mut expr: ExprRef = Arc::new(AxisStep { axis, test, context: self.vars.resolve(CTX_ITEM)? });
        for &predicate in ast.children(node).get(2..).unwrap_or_default() {
            expr = self.predicate(expr, self.child(predicate, 0)?)?;
        }
        Ok(expr)
    }

    fn node_test(&self, test: NodeId, axis: Axis) -> TResult<NodeTest> {
        if self.ast.kind(test) != AstKind::NameTest {
            return Ok(NodeTest::Kind(self.item_test(test)?));
        }
        let lexical = self.value(test)?;
        if lexical == "*" {
            return Ok(NodeTest::AnyName);
        }
        if let Some(local) = lexical.strip_prefix("*:") {
            return Ok(NodeTest::Local(local.to_string()));
        }
        if let Some(prefix) = lexical.strip_suffix(":*") {
            let uri = self.namespaces.get(prefix).ok_or_else(|| {
                Error::from_code(ErrorCode::XPST0081, format!("namespace prefix {prefix} is not bound"))
            })?;
            return Ok(NodeTest::Namespace(non_empty(uri).map(str::to_string)));
        }
        let default = if axis == Axis::Attribute { None } else { self.default_element_ns.as_deref() };
        Ok(NodeTest::Name(self.expand_qname(lexical, default)?))
    }

    // ---- constructors --------------------------------------------------------------------

    fn constructor(&mut self, node: NodeId) -> TResult<ExprRef> {
        let ast = self.ast;
        let kind = ast.kind(node);
        let constructor = match kind {
            AstKind::DirCommentConstructor => NodeConstructor {
                kind: ConstructorKind::Comment,
                name: None,
                content: vec![Arc::new(Literal::new(vec![XdmItem::from(self.value(node)?)]))],
            },
            AstKind::DirPIConstructor => NodeConstructor {
                kind: ConstructorKind::ProcessingInstruction,
                name: Some(ConstructorName::Fixed(QName::local(self.value(node)?))),
                content: self.lower_all(ast.children(node))?,
            },
            AstKind::CompDocumentConstructor | AstKind::CompTextConstructor | AstKind::CompCommentConstructor => {
                NodeConstructor {
                    kind: match kind {
                        AstKind::CompDocumentConstructor => ConstructorKind::Document,
                        AstKind::CompTextConstructor => ConstructorKind::Text,
                        _ => ConstructorKind::Comment,
                    },
                    name: None,
                    content: self.lower_all(ast.children(self.child(node, 0)?))?,
                }
            }
            _ => {
                let (kind, default) = match kind {
                    AstKind::CompElementConstructor => (ConstructorKind::Element, self.default_element_ns.clone()),
                    AstKind::CompAttributeConstructor => (ConstructorKind::Attribute, None),
                    AstKind::CompNamespaceConstructor => (ConstructorKind::Namespace, None),
                    AstKind::CompPIConstructor => (ConstructorKind::ProcessingInstruction, None),
                    other => return Err(Error::illegal_state(format!("{other} is not a constructor"))),
                };
                let name = self.child(node, 0)?;
                let name = if ast.kind(name) != AstKind::QNm {
                    ConstructorName::Computed {
                        expr: self.lower_expr(name)?,
                        namespaces: self.namespaces.clone(),
                        default_ns: default,
                    }
                } else if matches!(kind, ConstructorKind::Element | ConstructorKind::Attribute) {
                    ConstructorName::Fixed(self.expand_qname(self.value(name)?, default.as_deref())?)
                } else {
                    ConstructorName::Fixed(QName::local(self.value(name)?))
                };
                NodeConstructor { kind, name: Some(name), content: self.lower_all(ast.children(self.child(node, 1)?))? }
            }
        };
        Ok(Arc::new(constructor))
    }

    /// Literal value of a `xmlns` attribute, which must not hold enclosed expressions.
    fn namespace_attribute(&self, attribute: NodeId) -> TResult<String> {
        let ast = self.ast;
        let mut uri = String::new();
        for &part in ast.children(attribute) {
            if ast.kind(part) != AstKind::Str {
                return Err(Error::from_code(
                    ErrorCode::XPST0003,
                    "namespace declaration attributes must have a literal value",
                ));
            }
            uri.push_str(self.value(part)?);
        }
        Ok(uri)
    }

    /// `DirElementConstructor(DirAttributeConstructor*, ContentSequence)`. Namespace
    /// declaration attributes are in scope for the element, its attributes and its content.
    fn direct_element(&mut self, node: NodeId) -> TResult<ExprRef> {
        let ast = self.ast;
        let Some((&content, attributes)) = ast.children(node).split_last() else {
            return Err(Error::illegal_state("direct element without content"));
        };
        let saved = (self.namespaces.clone(), self.default_element_ns.clone());
        let mut plain = Vec::with_capacity(attributes.len());
        for &attribute in attributes {
            let name = self.value(attribute)?;
            if name == "xmlns" {
                self.default_element_ns = Some(self.namespace_attribute(attribute)?).filter(|u| !u.is_empty());
            } else if let Some(prefix) = name.strip_prefix("xmlns:") {
                let uri = self.namespace_attribute(attribute)?;
                self.namespaces.insert(prefix.to_string(), uri);
            } else {
                plain.push(attribute);
            }
        }
        let lowered = self.element_parts(node, &plain, content);
        (self.namespaces, self.default_element_ns) = saved;
        let (name, content) = lowered?;
        trace!(element = %name, parts = content.len(), "direct element");
        Ok(Arc::new(NodeConstructor { kind: ConstructorKind::Element, name: Some(ConstructorName::Fixed(name)), content }))
    }

    fn element_parts(&mut self, node: NodeId, attributes: &[NodeId], content: NodeId) -> TResult<(QName, Vec<ExprRef>)> {
        let name = self.expand_qname(self.value(node)?, self.default_element_ns.as_deref())?;
        let mut parts = Vec::with_capacity(attributes.len());
        for &attribute in attributes {
            parts.push(self.direct_attribute(attribute)?);
        }
        let ast = self.ast;
        for &part in ast.children(content) {
            parts.push(self.lower_expr(part)?);
        }
        Ok((name, parts))
    }

    fn direct_attribute(&mut self, node: NodeId) -> TResult<ExprRef> {
        let name = self.expand_qname(self.value(node)?, None)?;
        Ok(Arc::new(NodeConstructor {
            kind: ConstructorKind::Attribute,
            name: Some(ConstructorName::Fixed(name)),
            content: self.lower_all(self.ast.children(node))?,
        }))
    }

    fn function_call(&mut self, node: NodeId) -> TResult<ExprRef> {
        let ast = self.ast;
        let lexical = self.value(node)?;
        let name = self.function_name(lexical)?;
        let children = ast.children(node);
        if children.iter().any(|c| ast.kind(*c) == AstKind::ArgumentPlaceHolder) {
            return Err(Error::not_implemented("partial function application"));
        }
        let focus_function = name.ns_uri.as_deref() == Some(FNS) && children.is_empty();
        if focus_function {
            match &*name.local {
                "position" => return self.vars.resolve(CTX_POSITION),
                "last" => return self.vars.resolve(CTX_LAST),
                _ => {}
            }
        }
        let mut args = self.lower_all(children)?;
        if focus_function && matches!(&*name.local, "string" | "data" | "string-length") {
            args.push(self.vars.resolve(CTX_ITEM)?);
        }
        let arity = args.len();

        let declared = self.functions.get(&(name.clone(), arity)).cloned();
        let imported = || self.imports.iter().find_map(|m| m.function(&name, arity).cloned());
        if let Some(func) = declared.or_else(imported) {
            trace!(function = %name, arity, "user function call");
            return Ok(Arc::new(UserCall { func, args }));
        }

        let registry = &self.options.functions;
        let unprefixed = !lexical.contains(':') && !lexical.starts_with("Q{");
        let resolved = if unprefixed {
            registry.resolve(&QName::local(&name.local), arity, non_empty(&self.default_function_ns))
        } else {
            registry.resolve(&name, arity, None)
        };
        let func = resolved.map_err(ResolveError::into_error)?;
        Ok(Arc::new(FunctionCall { name, func: func.clone(), args }))
    }

    /// `TypedVariableBinding(Variable, SequenceType?)` or a bare `Variable`.
    fn bind_variable(&mut self, node: NodeId) -> TResult<Arc<Slot>> {
        let ast = self.ast;
        match ast.kind(node) {
            AstKind::Variable => Ok(self.vars.bind(self.value(node)?, None)),
            AstKind::TypedVariableBinding => {
                let name = self.value(self.child(node, 0)?)?;
                let ty = ast.child_of_kind(node, AstKind::SequenceType).map(|t| self.sequence_type(t)).transpose()?;
                Ok(self.vars.bind(name, ty))
            }
            other => Err(Error::illegal_state(format!("{other} does not bind a variable"))),
        }
    }

    fn quantified(&mut self, node: NodeId) -> TResult<ExprRef> {
        let ast = self.ast;
        let Some((&quantifier, rest)) = ast.children(node).split_first() else {
            return Err(Error::illegal_state("empty quantified expression"));
        };
        let quantifier = match ast.kind(quantifier) {
            AstKind::SomeQuantifier => Quantifier::Some,
            AstKind::EveryQuantifier => Quantifier::Every,
            other => return Err(Error::illegal_state(format!("{other} is not a quantifier"))),
        };
        let Some((&satisfies, pairs)) = rest.split_last() else {
            return Err(Error::illegal_state("quantified expression without test"));
        };
        let mut bindings = Vec::with_capacity(pairs.len() / 2);
        for pair in pairs.chunks(2) {
            let &[binding, domain] = pair else {
                return Err(Error::illegal_state("quantifier binding without domain"));
            };
            let domain = self.lower_expr(domain)?;
            bindings.push((self.bind_variable(binding)?, domain));
        }
        let satisfies = self.lower_expr(satisfies)?;
        self.vars.unbind_all(bindings.len())?;
        Ok(Arc::new(Quantified { quantifier, bindings, satisfies }))
    }

    fn switch(&mut self, node: NodeId) -> TResult<ExprRef> {
        let ast = self.ast;
        let operand = self.lower_child(node, 0)?;
        let Some((&default, clauses)) = ast.children(node).get(1..).and_then(<[NodeId]>::split_last) else {
            return Err(Error::illegal_state("switch without default"));
        };
        let mut cases = Vec::with_capacity(clauses.len());
        for &clause in clauses {
            let Some((&ret, operands)) = ast.children(clause).split_last() else {
                return Err(Error::illegal_state("empty switch clause"));
            };
            cases.push(SwitchCase { operands: self.lower_all(operands)?, ret: self.lower_expr(ret)? });
        }
        Ok(Arc::new(Switch { operand, cases, default: self.lower_expr(default)? }))
    }

    fn type_case(&mut self, case: NodeId) -> TResult<TypeCase> {
        let ast = self.ast;
        let ret = ast.last_child(case).ok_or_else(|| Error::illegal_state("empty typeswitch case"))?;
        let types = ast
            .children(case)
            .iter()
            .filter(|c| ast.kind(**c) == AstKind::SequenceType)
            .map(|t| self.sequence_type(*t))
            .collect::<TResult<Vec<_>>>()?;
        let var = match ast.child_of_kind(case, AstKind::Variable) {
            Some(var) => Some(self.vars.bind(self.value(var)?, None)),
            None => None,
        };
        let ret = self.lower_expr(ret)?;
        if var.is_some() {
            self.vars.unbind()?;
        }
        Ok(TypeCase { types, var, ret })
    }

    fn typeswitch(&mut self, node: NodeId) -> TResult<ExprRef> {
        let ast = self.ast;
        let operand = self.lower_child(node, 0)?;
        let mut cases = Vec::new();
        let mut default = None;
        for &case in ast.children(node).get(1..).unwrap_or_default() {
            let translated = self.type_case(case)?;
            if ast.property(case, "default") == Some("true") {
                default = Some(translated);
            } else {
                cases.push(translated);
            }
        }
        let default = default.ok_or_else(|| Error::illegal_state("typeswitch without default"))?;
        Ok(Arc::new(TypeSwitch { operand, cases, default }))
    }

    fn error_test(&self, test: &str) -> TResult<ErrorTest> {
        if test == "*" {
            return Ok(ErrorTest::Any);
        }
        if let Some(local) = test.strip_prefix("*:") {
            return Ok(ErrorTest::Local(local.to_string()));
        }
        if let Some(prefix) = test.strip_suffix(":*") {
            let uri = self.namespaces.get(prefix).ok_or_else(|| {
                Error::from_code(ErrorCode::XPST0081, format!("namespace prefix {prefix} is not bound"))
            })?;
            return Ok(ErrorTest::Namespace(uri.clone()));
        }
        Ok(ErrorTest::Name(self.expand_qname(test, None)?))
    }

    fn try_catch(&mut self, node: NodeId) -> TResult<ExprRef> {
        let ast = self.ast;
        let body = self.lower_child(node, 0)?;
        let mut clauses = Vec::new();
        for &clause in ast.children(node).get(1..).unwrap_or_default() {
            let tests = ast
                .children(self.child(clause, 0)?)
                .iter()
                .map(|t| self.error_test(self.value(*t)?))
                .collect::<TResult<Vec<_>>>()?;
            let names = ast.children(self.child(clause, 1)?);
            if names.len() > 3 {
                return Err(Error::from_code(
                    ErrorCode::XPST0003,
                    format!("a catch clause binds at most 3 variables, found {}", names.len()),
                ));
            }
            let mut vars: [Option<Arc<Slot>>; 3] = Default::default();
            for (var, name) in vars.iter_mut().zip(names) {
                *var = Some(self.vars.bind(self.value(*name)?, None));
            }
            let handler = self.lower_child(clause, 2)?;
            self.vars.unbind_all(names.len())?;
            clauses.push(CatchClause { tests, vars, handler });
        }
        Ok(Arc::new(TryCatch { body, clauses }))
    }

    // ---- pipelines -----------------------------------------------------------------------

    /// `ReturnExpr(Start(chain), ret)`. Chain bindings stay open while `ret` is translated.
    fn pipeline(&mut self, node: NodeId) -> TResult<ExprRef> {
        let mut opened = Vec::new();
        let operator = self.chain(self.child(node, 0)?, &mut opened)?;
        let ret = self.lower_child(node, 1)?;
        self.vars.unbind_all(opened.len())?;
        Ok(Arc::new(Pipeline { operator, ret }))
    }

    /// A FLWOR the optimizer left in clause form.
    fn flwor(&mut self, node: NodeId) -> TResult<ExprRef> {
        let ast = self.ast;
        let Some((&ret, clauses)) = ast.children(node).split_last() else {
            return Err(Error::illegal_state("empty FLWOR"));
        };
        let mut opened = Vec::new();
        let mut operator: OperatorRef = Arc::new(Start);
        for &clause in clauses {
            let kind = ast.kind(clause);
            operator = if matches!(kind, AstKind::TumblingWindowClause | AstKind::SlidingWindowClause) {
                self.window(clause, operator, &mut opened)?
            } else {
                self.clause(kind, clause, ast.children(clause), operator, &mut opened)?
            };
        }
        let ret = self.lower_child(ret, 0)?;
        self.vars.unbind_all(opened.len())?;
        Ok(Arc::new(Pipeline { operator, ret }))
    }

    /// Operators from `start`'s first child down to `End`, fed by a fresh [`Start`].
    fn chain(&mut self, start: NodeId, opened: &mut Vec<Arc<Slot>>) -> TResult<OperatorRef> {
        let ast = self.ast;
        let mut input: OperatorRef = Arc::new(Start);
        let mut node = self.child(start, 0)?;
        loop {
            let kind = ast.kind(node);
            match kind {
                AstKind::End => return Ok(input),
                AstKind::Join => {
                    input = self.join(node, input, opened)?;
                    node = self.child(node, 3)?;
                }
                _ if kind.is_pipe_operator() => {
                    let Some((&next, parts)) = ast.children(node).split_last() else {
                        return Err(Error::illegal_state(format!("{kind} without continuation")));
                    };
                    input = self.clause(kind, node, parts, input, opened)?;
                    node = next;
                }
                other => return Err(Error::illegal_state(format!("{other} inside an operator chain"))),
            }
        }
    }

    /// One clause or pipe operator. `parts` are its children without continuation.
    fn clause(
        &mut self,
        kind: AstKind,
        node: NodeId,
        parts: &[NodeId],
        input: OperatorRef,
        opened: &mut Vec<Arc<Slot>>,
    ) -> TResult<OperatorRef> {
        let ast = self.ast;
        let operator: OperatorRef = match kind {
            AstKind::ForClause | AstKind::ForBind => {
                let allowing_empty = ast.property(node, "allowingEmpty") == Some("true")
                    || parts.iter().any(|p| ast.kind(*p) == AstKind::AllowingEmpty);
                let bindings: Vec<NodeId> = parts
                    .iter()
                    .copied()
                    .filter(|p| matches!(ast.kind(*p), AstKind::TypedVariableBinding | AstKind::Variable))
                    .collect();
                let (Some(&expr), Some(&var)) = (parts.last(), bindings.first()) else {
                    return Err(Error::illegal_state("for binding without variable or domain"));
                };
                let expr = self.lower_expr(expr)?;
                let var = self.bind_variable(var)?;
                opened.push(var.clone());
                let position = match bindings.get(1) {
                    Some(&p) => {
                        let slot = self.bind_variable(p)?;
                        opened.push(slot.clone());
                        Some(slot)
                    }
                    None => None,
                };
                Arc::new(ForBind { input, var, position, allowing_empty, expr })
            }
            AstKind::LetClause | AstKind::LetBind => {
                let &[binding, expr] = parts else {
                    return Err(Error::illegal_state("malformed let binding"));
                };
                let expr = self.lower_expr(expr)?;
                let var = self.bind_variable(binding)?;
                opened.push(var.clone());
                Arc::new(LetBind { input, var, expr })
            }
            AstKind::WhereClause | AstKind::Selection => {
                let predicate = parts.first().ok_or_else(|| Error::illegal_state("where without condition"))?;
                Arc::new(Select { input, predicate: self.lower_expr(*predicate)? })
            }
            AstKind::OrderByClause | AstKind::OrderBy => {
                let specs = parts.iter().map(|s| self.order_spec(*s)).collect::<TResult<Vec<_>>>()?;
                Arc::new(OrderBy { input, specs })
            }
            AstKind::GroupByClause | AstKind::GroupBy => {
                let mut keys = Vec::with_capacity(parts.len());
                for &spec in parts {
                    let key = self.value(self.child(spec, 0)?)?;
                    keys.push(self.vars.resolve_slot(key)?);
                }
                Arc::new(GroupBy { input, keys })
            }
            AstKind::CountClause | AstKind::Count => {
                let binding = parts.first().ok_or_else(|| Error::illegal_state("count without variable"))?;
                let var = self.bind_variable(*binding)?;
                opened.push(var.clone());
                Arc::new(Count { input, var, check: None })
            }
            other => return Err(Error::illegal_state(format!("{other} is not a clause"))),
        };
        Ok(operator)
    }

    /// `Tumbling/SlidingWindowClause(binding, expr, WindowStartCondition, WindowEndCondition?)`.
    /// Start variables are bound first, then end variables, then the window.
    fn window(&mut self, node: NodeId, input: OperatorRef, opened: &mut Vec<Arc<Slot>>) -> TResult<OperatorRef> {
        let ast = self.ast;
        let kind =
            if ast.kind(node) == AstKind::SlidingWindowClause { WindowKind::Sliding } else { WindowKind::Tumbling };
        let expr = self.lower_child(node, 1)?;
        let start = self.window_condition(self.child(node, 2)?, opened)?;
        let end_node = ast.child_of_kind(node, AstKind::WindowEndCondition);
        let end = end_node.map(|e| self.window_condition(e, opened)).transpose()?;
        let only_end = end_node.is_some_and(|e| ast.property(e, "only") == Some("true"));
        let var = self.bind_variable(self.child(node, 0)?)?;
        opened.push(var.clone());
        trace!(?kind, only_end, "window");
        Ok(Arc::new(WindowBind { input, kind, var, expr, start, end, only_end }))
    }

    fn window_condition(&mut self, node: NodeId, opened: &mut Vec<Arc<Slot>>) -> TResult<WindowCondition> {
        let ast = self.ast;
        let mut vars = WindowVars::default();
        for &wrapper in ast.children(self.child(node, 0)?) {
            let slot = self.bind_variable(self.child(wrapper, 0)?)?;
            opened.push(slot.clone());
            let target = match ast.kind(wrapper) {
                AstKind::CurrentItem => &mut vars.current,
                AstKind::PositionalVar => &mut vars.position,
                AstKind::PreviousItem => &mut vars.previous,
                AstKind::NextItem => &mut vars.next,
                other => return Err(Error::illegal_state(format!("{other} is not a window variable"))),
            };
            *target = Some(slot);
        }
        let when = self.lower_child(node, 1)?;
        Ok(WindowCondition { vars, when })
    }

    fn order_spec(&mut self, spec: NodeId) -> TResult<OrderSpec> {
        let ast = self.ast;
        let descending = ast.child_of_kind(spec, AstKind::OrderByKind).and_then(|k| ast.value(k)) == Some("descending");
        let empty_greatest = match ast.child_of_kind(spec, AstKind::OrderByEmptyMode).and_then(|m| ast.value(m)) {
            Some(mode) => mode == "greatest",
            None => self.empty_greatest,
        };
        Ok(OrderSpec { key: self.lower_child(spec, 0)?, descending, empty_greatest })
    }

    /// `Join(Start(left), Start(right), JoinClause(cmp, lkey, rkey), next)`. The right chain
    /// is translated below the left bindings, matching the padded tuple it runs on.
    fn join(&mut self, node: NodeId, input: OperatorRef, opened: &mut Vec<Arc<Slot>>) -> TResult<OperatorRef> {
        let ast = self.ast;
        let left_from = opened.len();
        let left = self.chain(self.child(node, 0)?, opened)?;
        let left_vars = opened.get(left_from..).unwrap_or_default().to_vec();
        let right = self.chain(self.child(node, 1)?, opened)?;

        let clause = self.child(node, 2)?;
        let op_kind = ast.kind(self.child(clause, 0)?);
        let (mode, op) = comparison_op(op_kind)
            .ok_or_else(|| Error::illegal_state(format!("{op_kind} cannot drive a join")))?;
        let comparison = Comparison { mode, op, left: self.lower_child(clause, 1)?, right: self.lower_child(clause, 2)? };
        let group = ast.property(node, "group").map(|g| self.vars.resolve_slot(g)).transpose()?;
        trace!(left = left_vars.len(), grouped = group.is_some(), "join");
        Ok(Arc::new(Join { input, left, right, left_vars, comparison, group }))
    }

    // ---- types ---------------------------------------------------------------------------

    fn sequence_type(&self, node: NodeId) -> TResult<SequenceType> {
        let ast = self.ast;
        let item = self.child(node, 0)?;
        if ast.kind(item) == AstKind::EmptySequenceType {
            return Ok(SequenceType::empty());
        }
        let occurrence = match ast.child(node, 1).map(|c| ast.kind(c)) {
            Some(AstKind::CardinalityZeroOrOne) => Occurrence::ZeroOrOne,
            Some(AstKind::CardinalityZeroOrMany) => Occurrence::ZeroOrMore,
            Some(AstKind::CardinalityOneOrMany) => Occurrence::OneOrMore,
            _ => Occurrence::One,
        };
        Ok(SequenceType::new(self.item_test(item)?, occurrence))
    }

    /// Name of an element or attribute test; `*` and a missing name match any.
    fn node_name(&self, test: NodeId, default: Option<&str>) -> TResult<Option<QName>> {
        match self.ast.child_of_kind(test, AstKind::QNm).map(|n| self.value(n)).transpose()? {
            None | Some("*") => Ok(None),
            Some(name) => self.expand_qname(name, default).map(Some),
        }
    }

    fn item_test(&self, node: NodeId) -> TResult<ItemTest> {
        let ast = self.ast;
        Ok(match ast.kind(node) {
            AstKind::ItemType => ItemTest::AnyItem,
            AstKind::AnyKindType => ItemTest::AnyNode,
            AstKind::AtomicOrUnionType => ItemTest::Atomic(self.atomic_type(self.value(node)?)?),
            AstKind::DocumentType if ast.child_count(node) > 0 => {
                return Err(Error::not_implemented("document tests with an element test"));
            }
            AstKind::DocumentType => ItemTest::Node(NodeKind::Document, None),
            AstKind::ElementType => {
                ItemTest::Node(NodeKind::Element, self.node_name(node, self.default_element_ns.as_deref())?)
            }
            AstKind::AttributeType => ItemTest::Node(NodeKind::Attribute, self.node_name(node, None)?),
            AstKind::PIType => ItemTest::Node(NodeKind::ProcessingInstruction, ast.value(node).map(QName::local)),
            AstKind::CommentType => ItemTest::Node(NodeKind::Comment, None),
            AstKind::TextType => ItemTest::Node(NodeKind::Text, None),
            AstKind::NamespaceNodeType => ItemTest::Node(NodeKind::Namespace, None),
            AstKind::AnyFunctionType | AstKind::TypedFunctionType => ItemTest::AnyFunction,
            AstKind::SchemaElementType | AstKind::SchemaAttributeType => {
                return Err(Error::not_implemented("schema types"));
            }
            other => return Err(Error::illegal_state(format!("{other} is not an item type"))),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::BaseResolver;
    use crate::optimizer::{DefaultOptimizer, Optimizer};
    use crate::parser::parse;
    use crate::runtime::QueryContextBuilder;
    use crate::runtime::context::QueryContext;
    use crate::runtime::tuple::Tuple;
    use crate::xdm::XdmSequence;

    fn compile_with(query: &str, resolver: &dyn ModuleResolver) -> TResult<Module> {
        let mut ast = parse(query)?;
        DefaultOptimizer::new().optimize(&mut ast)?;
        PipelineTranslator.translate(&ast, &CompileOptions::default(), resolver)
    }

    fn compile(query: &str) -> TResult<Module> {
        compile_with(query, &BaseResolver::new())
    }

    fn eval_in(query: &str, ctx: &QueryContext) -> XdmSequence {
        let module = compile(query).unwrap();
        module.body().unwrap().evaluate(ctx, &Tuple::new()).unwrap()
    }

    fn eval(query: &str) -> XdmSequence {
        eval_in(query, &QueryContext::default())
    }

    fn ints(values: &[i64]) -> XdmSequence {
        values.iter().map(|v| XdmItem::from(*v)).collect()
    }

    fn code(query: &str) -> ErrorCode {
        compile(query).unwrap_err().code
    }

    #[test]
    fn flwor_with_where_and_order() {
        assert_eq!(eval("for $x in (3, 1, 2) where $x > 1 order by $x descending return $x"), ints(&[3, 2]));
    }

    #[test]
    fn positional_and_count_variables() {
        assert_eq!(eval("for $x at $i in ('a', 'b') return $i"), ints(&[1, 2]));
        assert_eq!(eval("for $x in ('a', 'b', 'c') count $c where $c ge 2 return $c"), ints(&[2, 3]));
        assert_eq!(eval("for $x allowing empty in () return 'e'"), vec![XdmItem::from("e")]);
    }

    #[test]
    fn unused_let_is_skipped() {
        assert_eq!(eval("let $unused := 1 let $y := 2 return $y"), ints(&[2]));
    }

    #[test]
    fn paths_inside_functions_take_their_focus_from_the_first_step() {
        let query = "declare function local:titles($d) { $d//title/string() }; \
                     local:titles(<r><title>a</title><x><title>b</title></x></r>)";
        assert_eq!(eval(query), vec![XdmItem::from("a"), XdmItem::from("b")]);
    }

    #[test]
    fn window_variables_are_visible_to_later_clauses() {
        let query = "for tumbling window $w in (1 to 5) start $s at $i when $i mod 2 = 1 \
                     end $e at $j when $j = $i + 1 where $e lt 5 return $s * 10 + $e";
        assert_eq!(eval(query), ints(&[12, 34]));
    }

    #[test]
    fn grouping_concatenates_the_other_bindings() {
        let query = "for $x in (1, 2, 1, 3) let $y := $x * 10 group by $k := $x mod 2 order by $k return sum($y)";
        assert_eq!(eval(query), ints(&[20, 50]));
    }

    #[test]
    fn joins_pair_matching_bindings() {
        let query = "for $a in (1, 2, 3) for $b in (2, 3, 4) where $a = $b return $a * 10 + $b";
        assert_eq!(eval(query), ints(&[22, 33]));
    }

    #[test]
    fn recursive_user_function() {
        let query = "declare function local:fact($n) { if ($n le 1) then 1 else $n * local:fact($n - 1) }; \
                     local:fact(5)";
        assert_eq!(eval(query), ints(&[120]));
    }

    #[test]
    fn globals_and_external_values() {
        let query = "declare variable $x external; declare variable $y := $x + 1; $y";
        let ctx = QueryContextBuilder::new().with_variable("x", ints(&[41])).build();
        assert_eq!(eval_in(query, &ctx), ints(&[42]));
        assert_eq!(eval("declare context item := 5; . + 1"), ints(&[6]));
        assert_eq!(eval("declare context item := 'abc'; string-length()"), ints(&[3]));
    }

    #[test]
    fn filters_bind_their_own_focus() {
        assert_eq!(eval("(10, 20, 30)[position() = last()]"), ints(&[30]));
        assert_eq!(eval("(1, 2, 3, 4)[. mod 2 = 0]"), ints(&[2, 4]));
        assert_eq!(eval("(5, 6, 7)[2]"), ints(&[6]));
    }

    #[test]
    fn branching_expressions() {
        assert_eq!(eval("switch (2) case 1 return 'a' case 2 case 3 return 'b' default return 'c'"), vec![
            XdmItem::from("b")
        ]);
        let typeswitch = "typeswitch (5) case $s as xs:string return $s case xs:integer return 'int' \
                          default return 'other'";
        assert_eq!(eval(typeswitch), vec![XdmItem::from("int")]);
        assert_eq!(eval("some $x in (1, 2, 3) satisfies $x gt 2"), vec![XdmItem::from(true)]);
        assert_eq!(eval("every $x in (1, 2), $y in ($x, 3) satisfies $y ge $x"), vec![XdmItem::from(true)]);
        assert_eq!(eval("try { 1 div 0 } catch err:FOAR0001 { 'caught' }"), vec![XdmItem::from("caught")]);
    }

    #[test]
    fn casts() {
        assert_eq!(eval("'12' cast as xs:integer"), ints(&[12]));
        assert_eq!(eval("() cast as xs:integer?"), Vec::new());
        assert_eq!(eval("'a' castable as xs:integer"), vec![XdmItem::from(false)]);
        assert_eq!(code("1 cast as xs:nope"), ErrorCode::XPST0051);
    }

    #[test]
    fn focus_is_absent_in_functions_and_context_initializers() {
        assert_eq!(code("declare function local:f() { . }; local:f()"), ErrorCode::XPDY0002);
        assert_eq!(code("declare function local:f() { position() }; local:f()"), ErrorCode::XPDY0002);
        assert_eq!(code("declare context item := .; 1"), ErrorCode::XQDY0054);
    }

    #[test]
    fn static_errors() {
        assert_eq!(code("local:missing()"), ErrorCode::XPST0017);
        assert_eq!(code("count(1, 2)"), ErrorCode::XPST0017);
        assert_eq!(code("nope:f()"), ErrorCode::XPST0081);
        assert_eq!(code("declare function local:f() { 1 }; declare function local:f() { 2 }; 1"), ErrorCode::XQST0034);
        assert_eq!(code("declare function local:f() external; 1"), ErrorCode::NYI0000);
        assert_eq!(code("a/preceding::b"), ErrorCode::NYI0000);
        assert_eq!(code("declare function local:f() { a }; 1"), ErrorCode::XPDY0002);
        assert_eq!(code("import module namespace m = 'urn:none'; 1"), ErrorCode::XQST0059);
    }

    #[test]
    fn imported_functions_are_callable() {
        let resolver = BaseResolver::new();
        let library = compile_with(
            "module namespace m = 'urn:lib'; declare function m:twice($x) { $x * 2 };",
            &resolver,
        )
        .unwrap();
        assert_eq!(library.namespace(), Some("urn:lib"));
        resolver.register("urn:lib", Arc::new(library)).unwrap();
        let main = compile_with("import module namespace m = 'urn:lib'; m:twice(21)", &resolver).unwrap();
        let value = main.body().unwrap().evaluate(&QueryContext::default(), &Tuple::new()).unwrap();
        assert_eq!(value, ints(&[42]));
    }

    #[test]
    fn updating_bodies_are_flagged() {
        assert!(compile("delete node ()").unwrap().is_updating());
        assert!(!compile("1 + 1").unwrap().is_updating());
        let query = "declare updating function local:u($n) { delete node $n }; local:u(())";
        assert!(compile(query).unwrap().is_updating());
    }
}
