use platynui_xquery::module::BaseResolver;
use platynui_xquery::update::UpdatePayload;
use platynui_xquery::{
    CompileChain, CompileOptions, Error, ErrorCode, QueryContext, QueryContextBuilder, SimpleNode, UpdateApplier,
    UpdateKind, UpdateOp, attr, elem, text,
};
use rstest::{fixture, rstest};
use std::sync::Arc;

#[fixture]
fn chain() -> CompileChain {
    CompileChain::new().with_options(CompileOptions::default()).with_resolver(Arc::new(BaseResolver::new()))
}

struct Library {
    book: SimpleNode,
    title: SimpleNode,
    id: SimpleNode,
}

#[fixture]
fn library() -> Library {
    let id = attr("id", "b1");
    let title = elem("title").child(text("Old")).build();
    let book = elem("book").attr(id.clone()).child(title.clone()).build();
    Library { book, title, id }
}

fn context(lib: &Library) -> QueryContext {
    QueryContextBuilder::new()
        .with_variable("book", vec![lib.book.clone().into_item()])
        .with_variable("title", vec![lib.title.clone().into_item()])
        .with_variable("id", vec![lib.id.clone().into_item()])
        .build()
}

const PROLOG: &str = "declare variable $book external; declare variable $title external; \
                      declare variable $id external; ";

#[derive(Default)]
struct Recorder(Vec<(UpdateKind, u64)>);

impl UpdateApplier for Recorder {
    fn apply(&mut self, op: &UpdateOp) -> Result<(), Error> {
        self.0.push((op.kind, op.target.node_id()));
        Ok(())
    }
}

#[rstest]
fn operations_are_applied_in_order(chain: CompileChain, library: Library) {
    let query = format!(
        "{PROLOG}(delete node $title, replace value of node $id with 'b2', rename node $book as 'volume', \
         insert node 'x' into $book)"
    );
    let query = chain.compile(&query).unwrap();
    assert!(query.is_updating());
    let ctx = context(&library);
    let mut recorder = Recorder::default();
    let (result, applied) = query.execute(&ctx, &mut recorder).unwrap();
    assert!(result.is_empty());
    assert_eq!(applied, 4);
    let kinds: Vec<UpdateKind> = recorder.0.iter().map(|(kind, _)| *kind).collect();
    assert_eq!(kinds, vec![UpdateKind::InsertInto, UpdateKind::ReplaceValue, UpdateKind::Rename, UpdateKind::Delete]);
    assert_eq!(recorder.0[3].1, library.title.handle().node_id());
    assert_eq!(ctx.pending_updates(), 0);
}

#[rstest]
fn read_phase_only_collects(chain: CompileChain, library: Library) {
    let query = chain.compile(&format!("{PROLOG}for $n in ($book, $title) return delete node $n")).unwrap();
    let ctx = context(&library);
    assert!(query.evaluate(&ctx).unwrap().is_empty());
    let list = ctx.take_updates();
    assert_eq!(list.len(), 2);
    assert!(list.ops().iter().all(|op| op.kind == UpdateKind::Delete));
}

#[rstest]
fn element_values_replace_content(chain: CompileChain, library: Library) {
    let query = chain.compile(&format!("{PROLOG}replace value of node $title with ('New', 'Title')")).unwrap();
    let ctx = context(&library);
    query.evaluate(&ctx).unwrap();
    let list = ctx.take_updates();
    let op = &list.ops()[0];
    assert_eq!(op.kind, UpdateKind::ReplaceElementContent);
    assert!(matches!(&op.payload, UpdatePayload::Value(v) if v == "New Title"));
}

#[rstest]
#[case("(rename node $book as 'a', rename node $book as 'b')", ErrorCode::XUDY0015)]
#[case("(replace node $title with 'a', replace node $title with 'b')", ErrorCode::XUDY0016)]
#[case("(replace value of node $id with 'a', replace value of node $id with 'b')", ErrorCode::XUDY0017)]
#[case("for $i in (1, 2) return replace value of node $title with $i", ErrorCode::XUDY0021)]
fn conflicting_targets(chain: CompileChain, library: Library, #[case] body: &str, #[case] code: ErrorCode) {
    let query = chain.compile(&format!("{PROLOG}{body}")).unwrap();
    let mut recorder = Recorder::default();
    let err = query.execute(&context(&library), &mut recorder).unwrap_err();
    assert_eq!(err.code, code);
    assert!(recorder.0.is_empty());
}

#[rstest]
#[case("rename node (1, 2) as 'a'")]
#[case("insert node 'x' into ($book, $title)")]
#[case("delete node 'text'")]
fn targets_must_be_nodes(chain: CompileChain, library: Library, #[case] body: &str) {
    let query = chain.compile(&format!("{PROLOG}{body}")).unwrap();
    assert_eq!(query.evaluate(&context(&library)).unwrap_err().code, ErrorCode::XPTY0004);
}

#[rstest]
fn updating_functions_make_the_query_updating(chain: CompileChain, library: Library) {
    let query = format!(
        "{PROLOG}declare updating function local:drop($n) {{ delete node $n }}; \
         local:drop($title)"
    );
    let query = chain.compile(&query).unwrap();
    assert!(query.is_updating());
    let mut recorder = Recorder::default();
    assert_eq!(query.execute(&context(&library), &mut recorder).unwrap().1, 1);
    assert!(!chain.compile("1 + 1").unwrap().is_updating());
}

#[rstest]
fn path_targets_reach_the_bound_nodes(chain: CompileChain, library: Library) {
    let query = chain.compile(&format!("{PROLOG}(delete node $book/title, replace value of node $book/@id with 'b9')")).unwrap();
    let mut recorder = Recorder::default();
    query.execute(&context(&library), &mut recorder).unwrap();
    let targets: Vec<u64> = recorder.0.iter().map(|(_, id)| *id).collect();
    assert_eq!(targets.len(), 2);
    assert!(targets.contains(&library.title.handle().node_id()));
    assert!(targets.contains(&library.id.handle().node_id()));
}
