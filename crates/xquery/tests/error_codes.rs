use platynui_xquery::module::BaseResolver;
use platynui_xquery::{CompileChain, CompileOptions, ErrorCode, QueryContext};
use rstest::{fixture, rstest};
use std::sync::Arc;

#[fixture]
fn chain() -> CompileChain {
    CompileChain::new().with_options(CompileOptions::default()).with_resolver(Arc::new(BaseResolver::new()))
}

#[rstest]
fn codes_round_trip() {
    let codes = [
        ErrorCode::XPST0003,
        ErrorCode::XPST0008,
        ErrorCode::XPST0017,
        ErrorCode::XQST0034,
        ErrorCode::XQST0049,
        ErrorCode::XQDY0054,
        ErrorCode::XPTY0018,
        ErrorCode::XQTY0024,
        ErrorCode::XQDY0072,
        ErrorCode::XUDY0021,
        ErrorCode::BIST0001,
        ErrorCode::NYI0000,
    ];
    for code in codes {
        assert_eq!(ErrorCode::from_code(code.as_str()), code);
    }
    assert_eq!(ErrorCode::from_code("err:NOPE0000"), ErrorCode::Unknown);
}

#[rstest]
#[case("1 +", ErrorCode::XPST0003)]
#[case("for $x in (1, 2) retrun $x", ErrorCode::XPST0003)]
#[case("$nowhere", ErrorCode::XPST0008)]
#[case("declare variable $x := 1; declare variable $x := 2; $x", ErrorCode::XQST0049)]
#[case("declare function local:f() { 1 }; declare function local:f() { 2 }; 1", ErrorCode::XQST0034)]
#[case("unknown-function()", ErrorCode::XPST0017)]
#[case("count()", ErrorCode::XPST0017)]
#[case("q:f()", ErrorCode::XPST0081)]
#[case("1 cast as xs:whatever", ErrorCode::XPST0051)]
#[case("99999999999999999999", ErrorCode::FOAR0002)]
#[case("declare function local:f() { . }; local:f()", ErrorCode::XPDY0002)]
#[case("declare context item := . + 1; .", ErrorCode::XQDY0054)]
#[case("import module namespace m = 'urn:missing'; 1", ErrorCode::XQST0059)]
#[case("1 (: open", ErrorCode::XPST0003)]
#[case("'&#0;'", ErrorCode::XQST0090)]
#[case("//a/following::b", ErrorCode::NYI0000)]
#[case("function($x) { $x }", ErrorCode::NYI0000)]
fn static_errors(chain: CompileChain, #[case] query: &str, #[case] code: ErrorCode) {
    assert_eq!(chain.compile(query).unwrap_err().code, code);
}

#[rstest]
#[case("1 div 0", ErrorCode::FOAR0001)]
#[case("'x' cast as xs:integer", ErrorCode::FORG0001)]
#[case("if ((1, 2)) then 1 else 0", ErrorCode::FORG0006)]
#[case("(1, 2) + 1", ErrorCode::XPTY0004)]
#[case("error()", ErrorCode::FOER0000)]
#[case("collection('books')", ErrorCode::FODC0002)]
#[case(".", ErrorCode::XPDY0002)]
#[case("//item", ErrorCode::XPDY0002)]
#[case("declare variable $v external; $v", ErrorCode::XPDY0002)]
#[case("declare function local:f($x as xs:integer) { $x }; local:f('a')", ErrorCode::XPTY0004)]
fn dynamic_errors(chain: CompileChain, #[case] query: &str, #[case] code: ErrorCode) {
    let query = chain.compile(query).unwrap();
    assert_eq!(query.evaluate(&QueryContext::default()).unwrap_err().code, code);
}

#[rstest]
fn parse_errors_name_the_fragment(chain: CompileChain) {
    let err = chain.compile("let $x := 1 retrun $x").unwrap_err();
    assert!(err.message.starts_with("Expected one of ["), "{}", err.message);
    assert!(err.message.contains("retrun"), "{}", err.message);
}
