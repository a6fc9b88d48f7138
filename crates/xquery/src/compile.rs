//! Compile entry points: options, the parse → optimize → translate chain and compiled queries.

use crate::ast::{Ast, dot};
use crate::consts::FNS;
use crate::error::Error;
use crate::module::{BaseResolver, Module, ModuleResolver};
use crate::optimizer::{DefaultOptimizer, Optimizer};
use crate::parser::parse;
use crate::runtime::{FunctionRegistry, QueryContext, Tuple, default_function_registry};
use crate::translator::{PipelineTranslator, Translator};
use crate::update::UpdateApplier;
use crate::xdm::XdmSequence;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use tracing::{debug, warn};

/// Environment variable naming the directory AST dumps are written to.
pub const DEBUG_DIR_ENV: &str = "XQUERY_DEBUG_DIR";

static DEFAULT_FUNCTIONS: LazyLock<Arc<FunctionRegistry>> = LazyLock::new(|| Arc::new(default_function_registry()));

/// Static settings a module is compiled with. Prolog declarations extend these.
#[derive(Debug, Clone)]
pub struct CompileOptions {
    pub namespaces: HashMap<String, String>,
    pub default_function_namespace: String,
    /// When set, `parsed.dot` and `xquery.dot` are written here on every compile.
    pub debug_dir: Option<PathBuf>,
    pub functions: Arc<FunctionRegistry>,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            namespaces: HashMap::new(),
            default_function_namespace: FNS.to_string(),
            debug_dir: None,
            functions: DEFAULT_FUNCTIONS.clone(),
        }
    }
}

impl CompileOptions {
    /// Defaults with the debug directory taken from `XQUERY_DEBUG_DIR`.
    pub fn from_env() -> Self {
        let mut builder = CompileOptionsBuilder::new();
        if let Some(dir) = std::env::var_os(DEBUG_DIR_ENV).filter(|d| !d.is_empty()) {
            builder = builder.with_debug_dir(dir);
        }
        builder.build()
    }
}

pub struct CompileOptionsBuilder {
    options: CompileOptions,
}

impl Default for CompileOptionsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CompileOptionsBuilder {
    pub fn new() -> Self {
        Self { options: CompileOptions::default() }
    }

    /// Bind a namespace prefix. The reserved `xml` prefix cannot be rebound and is ignored.
    pub fn with_namespace(mut self, prefix: impl Into<String>, uri: impl Into<String>) -> Self {
        let prefix = prefix.into();
        if prefix == "xml" {
            return self;
        }
        self.options.namespaces.insert(prefix, uri.into());
        self
    }

    pub fn with_default_function_namespace(mut self, uri: impl Into<String>) -> Self {
        self.options.default_function_namespace = uri.into();
        self
    }

    pub fn with_debug_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.options.debug_dir = Some(dir.into());
        self
    }

    pub fn with_functions(mut self, functions: Arc<FunctionRegistry>) -> Self {
        self.options.functions = functions;
        self
    }

    pub fn build(self) -> CompileOptions {
        self.options
    }
}

/// Parser, optimizer and translator run in sequence over one compilation unit.
pub struct CompileChain {
    options: CompileOptions,
    optimizer: Box<dyn Optimizer>,
    translator: Box<dyn Translator>,
    resolver: Arc<dyn ModuleResolver>,
}

impl Default for CompileChain {
    fn default() -> Self {
        Self::new()
    }
}

impl CompileChain {
    /// Default optimizer and translator, the process-wide resolver and options from the
    /// environment.
    pub fn new() -> Self {
        Self {
            options: CompileOptions::from_env(),
            optimizer: Box::new(DefaultOptimizer::new()),
            translator: Box::new(PipelineTranslator),
            resolver: BaseResolver::shared(),
        }
    }

    pub fn with_options(mut self, options: CompileOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_optimizer(mut self, optimizer: impl Optimizer + 'static) -> Self {
        self.optimizer = Box::new(optimizer);
        self
    }

    pub fn with_translator(mut self, translator: impl Translator + 'static) -> Self {
        self.translator = Box::new(translator);
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn ModuleResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    pub fn resolver(&self) -> &Arc<dyn ModuleResolver> {
        &self.resolver
    }

    /// Parse and optimize without translating.
    pub fn optimize(&self, query: &str) -> Result<Ast, Error> {
        let mut ast = parse(query)?;
        debug!(nodes = ast.len(), "parsed");
        self.dump(&ast, "parsed.dot");
        self.optimizer.optimize(&mut ast)?;
        self.dump(&ast, "xquery.dot");
        Ok(ast)
    }

    /// Compile a main or library module. Library modules are registered with the resolver.
    pub fn compile(&self, query: &str) -> Result<Query, Error> {
        let ast = self.optimize(query)?;
        let module = Arc::new(self.translator.translate(&ast, &self.options, self.resolver.as_ref())?);
        if let Some(namespace) = module.namespace() {
            self.resolver.register(namespace, module.clone())?;
        }
        debug!(library = module.namespace().is_some(), updating = module.is_updating(), "compiled");
        Ok(Query { module })
    }

    fn dump(&self, ast: &Ast, file: &str) {
        let (Some(dir), Some(root)) = (&self.options.debug_dir, ast.root()) else {
            return;
        };
        if let Err(err) = write_dot(dir, file, &dot::to_dot(ast, root)) {
            warn!(dir = %dir.display(), file, %err, "could not write AST dump");
        }
    }
}

fn write_dot(dir: &Path, file: &str, content: &str) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    std::fs::write(dir.join(file), content)
}

/// Compile with a default chain.
pub fn compile_xquery(query: &str) -> Result<Query, Error> {
    CompileChain::new().compile(query)
}

/// A compiled module, ready to run against any number of query contexts.
#[derive(Debug, Clone)]
pub struct Query {
    module: Arc<Module>,
}

impl Query {
    pub fn module(&self) -> &Arc<Module> {
        &self.module
    }

    pub fn is_updating(&self) -> bool {
        self.module.is_updating()
    }

    /// Read phase. Updating expressions leave their operations in `ctx`. A library module
    /// evaluates to the empty sequence.
    pub fn evaluate(&self, ctx: &QueryContext) -> Result<XdmSequence, Error> {
        match self.module.body() {
            Some(body) => body.evaluate(ctx, &Tuple::new()),
            None => Ok(XdmSequence::new()),
        }
    }

    /// Read phase followed by applying the pending updates. Returns the result and the
    /// number of applied operations.
    pub fn execute(&self, ctx: &QueryContext, applier: &mut dyn UpdateApplier) -> Result<(XdmSequence, usize), Error> {
        let result = self.evaluate(ctx)?;
        let applied = ctx.take_updates().apply(applier)?;
        debug!(applied, "applied pending updates");
        Ok((result, applied))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::LOCAL_NS;
    use crate::error::ErrorCode;
    use crate::update::UpdateOp;
    use crate::xdm::XdmItem;

    fn chain() -> CompileChain {
        CompileChain::new().with_options(CompileOptions::default()).with_resolver(Arc::new(BaseResolver::new()))
    }

    #[derive(Default)]
    struct Recorder(Vec<String>);

    impl UpdateApplier for Recorder {
        fn apply(&mut self, op: &UpdateOp) -> Result<(), Error> {
            self.0.push(op.to_string());
            Ok(())
        }
    }

    #[test]
    fn builder_ignores_the_xml_prefix() {
        let options = CompileOptionsBuilder::new()
            .with_namespace("xml", "urn:other")
            .with_namespace("p", "urn:p")
            .with_default_function_namespace(LOCAL_NS)
            .build();
        assert_eq!(options.namespaces.get("p").map(String::as_str), Some("urn:p"));
        assert!(!options.namespaces.contains_key("xml"));
        assert_eq!(options.default_function_namespace, LOCAL_NS);
    }

    #[test]
    fn option_prefixes_are_in_scope() {
        let chain = chain().with_options(CompileOptionsBuilder::new().with_namespace("my", LOCAL_NS).build());
        let query = chain.compile("declare function local:f() { 7 }; my:f()").unwrap();
        assert_eq!(query.evaluate(&QueryContext::default()).unwrap(), vec![XdmItem::from(7i64)]);
    }

    #[test]
    fn libraries_register_and_evaluate_to_nothing() {
        let chain = chain();
        let library = chain.compile("module namespace m = 'urn:m'; declare function m:one() { 1 };").unwrap();
        assert!(library.evaluate(&QueryContext::default()).unwrap().is_empty());
        assert!(chain.resolver().resolve("urn:m").is_some());
        let main = chain.compile("import module namespace m = 'urn:m'; m:one() + 1").unwrap();
        assert_eq!(main.evaluate(&QueryContext::default()).unwrap(), vec![XdmItem::from(2i64)]);
    }

    #[test]
    fn parse_errors_surface_unchanged() {
        assert_eq!(chain().compile("1 +").unwrap_err().code, ErrorCode::XPST0003);
    }

    #[test]
    fn execute_without_updates_applies_nothing() {
        let query = chain().compile("1 to 3").unwrap();
        let mut recorder = Recorder::default();
        let (result, applied) = query.execute(&QueryContext::default(), &mut recorder).unwrap();
        assert_eq!(result.len(), 3);
        assert_eq!(applied, 0);
        assert!(recorder.0.is_empty());
    }

    #[test]
    fn debug_dir_receives_both_dumps() {
        let dir = tempfile::tempdir().unwrap();
        let options = CompileOptionsBuilder::new().with_debug_dir(dir.path().join("dumps")).build();
        chain().with_options(options).compile("for $x in (1, 2) return $x").unwrap();
        let parsed = std::fs::read_to_string(dir.path().join("dumps/parsed.dot")).unwrap();
        let optimized = std::fs::read_to_string(dir.path().join("dumps/xquery.dot")).unwrap();
        assert!(parsed.contains("FlowrExpr"));
        assert!(optimized.contains("ForBind"));
    }
}
