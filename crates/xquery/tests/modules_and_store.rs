use platynui_xquery::module::BaseResolver;
use platynui_xquery::{
    CompileChain, CompileOptions, CompileOptionsBuilder, Error, ErrorCode, MemoryStore, ModuleResolver, NodeHandle,
    QueryContext, QueryContextBuilder, Store, XdmItem, elem,
};
use rstest::{fixture, rstest};
use std::sync::Arc;

#[fixture]
fn resolver() -> Arc<BaseResolver> {
    Arc::new(BaseResolver::new())
}

fn chain_with(resolver: &Arc<BaseResolver>) -> CompileChain {
    CompileChain::new().with_options(CompileOptions::default()).with_resolver(resolver.clone())
}

const MATH: &str = "module namespace math = 'urn:math';
    declare function math:square($x) { $x * $x };
    declare function math:cube($x) { math:square($x) * $x };";

#[rstest]
fn imported_functions_resolve_through_the_registry(resolver: Arc<BaseResolver>) {
    let chain = chain_with(&resolver);
    chain.compile(MATH).unwrap();
    assert_eq!(resolver.len(), 1);
    let query = chain.compile("import module namespace m = 'urn:math'; (m:square(3), m:cube(2))").unwrap();
    let value = query.evaluate(&QueryContext::default()).unwrap();
    assert_eq!(value, vec![XdmItem::from(9i64), XdmItem::from(8i64)]);
}

#[rstest]
fn libraries_can_import_libraries(resolver: Arc<BaseResolver>) {
    let chain = chain_with(&resolver);
    chain.compile(MATH).unwrap();
    chain
        .compile(
            "module namespace geo = 'urn:geo';
             import module namespace math = 'urn:math';
             declare function geo:area($side) { math:square($side) };",
        )
        .unwrap();
    let query = chain.compile("import module namespace g = 'urn:geo'; g:area(4)").unwrap();
    assert_eq!(query.evaluate(&QueryContext::default()).unwrap(), vec![XdmItem::from(16i64)]);
}

#[rstest]
fn imports_need_a_registered_module(resolver: Arc<BaseResolver>) {
    let chain = chain_with(&resolver);
    let err = chain.compile("import module namespace m = 'urn:math'; m:square(2)").unwrap_err();
    assert_eq!(err.code, ErrorCode::XQST0059);
    assert!(resolver.is_empty());
}

#[rstest]
fn unknown_imported_function_is_a_static_error(resolver: Arc<BaseResolver>) {
    let chain = chain_with(&resolver);
    chain.compile(MATH).unwrap();
    let err = chain.compile("import module namespace m = 'urn:math'; m:root(2)").unwrap_err();
    assert_eq!(err.code, ErrorCode::XPST0017);
}

#[rstest]
fn failed_library_is_not_registered(resolver: Arc<BaseResolver>) {
    let chain = chain_with(&resolver);
    let err = chain.compile("module namespace bad = 'urn:bad'; declare function bad:f() { $missing };");
    assert_eq!(err.unwrap_err().code, ErrorCode::XPST0008);
    assert!(resolver.resolve("urn:bad").is_none());
}

#[rstest]
fn collections_come_from_the_store(resolver: Arc<BaseResolver>) {
    let store = Arc::new(MemoryStore::new());
    let books = store.create("books").unwrap();
    for name in ["a", "b", "c"] {
        let mut parser = || -> Result<NodeHandle, Error> { Ok(elem(name).build_handle()) };
        books.add(&mut parser).unwrap();
    }
    let ctx = QueryContextBuilder::new().with_store(store).build();
    let chain = chain_with(&resolver);
    let count = chain.compile("count(collection('books'))").unwrap().evaluate(&ctx).unwrap();
    assert_eq!(count, vec![XdmItem::from(3i64)]);
    let missing = chain.compile("collection('films')").unwrap().evaluate(&ctx).unwrap_err();
    assert_eq!(missing.code, ErrorCode::FODC0002);
    let empty = chain.compile("collection(())").unwrap().evaluate(&ctx).unwrap_err();
    assert_eq!(empty.code, ErrorCode::FODC0002);
}

#[rstest]
fn debug_dumps_are_written(resolver: Arc<BaseResolver>) {
    let dir = tempfile::tempdir().unwrap();
    let options = CompileOptionsBuilder::new().with_debug_dir(dir.path()).build();
    let chain = chain_with(&resolver).with_options(options);
    chain.compile("for $x in (1, 2) where $x gt 1 return $x").unwrap();
    let parsed = std::fs::read_to_string(dir.path().join("parsed.dot")).unwrap();
    let optimized = std::fs::read_to_string(dir.path().join("xquery.dot")).unwrap();
    assert!(parsed.starts_with("digraph AST {"));
    assert!(parsed.contains("WhereClause"));
    assert!(optimized.contains("Selection"));
}

#[rstest]
fn unwritable_debug_dir_does_not_fail_the_compile(resolver: Arc<BaseResolver>) {
    let file = tempfile::NamedTempFile::new().unwrap();
    let options = CompileOptionsBuilder::new().with_debug_dir(file.path().join("below-a-file")).build();
    let chain = chain_with(&resolver).with_options(options);
    assert!(chain.compile("1").is_ok());
}
