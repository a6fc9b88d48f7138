use crate::util::{QuerySource, parse_binding};
use clap::Args;
use platynui_xquery::xdm::XdmAtomicValue;
use platynui_xquery::{CompileChain, QueryContextBuilder, XdmItem};
use std::fmt::Write;
use tracing::info;

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub source: QuerySource,
    /// Bind an external variable to an untyped value, as `name=value`.
    #[arg(long = "var", value_name = "NAME=VALUE")]
    pub vars: Vec<String>,
    /// Context item, as an untyped value.
    #[arg(long = "context", value_name = "VALUE")]
    pub context: Option<String>,
}

fn untyped(value: &str) -> XdmItem {
    XdmItem::Atomic(XdmAtomicValue::UntypedAtomic(value.into()))
}

pub fn run(args: &RunArgs) -> anyhow::Result<String> {
    let query = args.source.read()?;
    let mut builder = QueryContextBuilder::new();
    for binding in &args.vars {
        let (name, value) = parse_binding(binding)?;
        builder = builder.with_variable(name, vec![untyped(&value)]);
    }
    if let Some(item) = &args.context {
        builder = builder.with_context_item(untyped(item));
    }
    let compiled = CompileChain::new().compile(&query)?;
    let ctx = builder.build();
    let result = compiled.evaluate(&ctx)?;
    let pending = ctx.pending_updates();
    if pending > 0 {
        info!(pending, "pending updates discarded, no store to apply them to");
    }
    let mut out = String::new();
    for (i, item) in result.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        write!(out, "{item}")?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn args(query: &str, vars: &[&str]) -> RunArgs {
        RunArgs {
            source: QuerySource { query: Some(query.to_string()), file: None },
            vars: vars.iter().map(ToString::to_string).collect(),
            context: None,
        }
    }

    #[rstest]
    #[case("1 to 3", &[], "1\n2\n3")]
    #[case("declare variable $n external; $n + 1", &["n=41"], "42")]
    #[case("declare variable $s external; concat($s, '!')", &["$s=hi"], "hi!")]
    #[case("()", &[], "")]
    fn prints_one_item_per_line(#[case] query: &str, #[case] vars: &[&str], #[case] expected: &str) {
        assert_eq!(run(&args(query, vars)).unwrap(), expected);
    }

    #[test]
    fn context_item_is_untyped() {
        let mut args = args("string-length(.)", &[]);
        args.context = Some("abcd".to_string());
        assert_eq!(run(&args).unwrap(), "4");
    }

    #[test]
    fn errors_carry_the_code() {
        let err = run(&args("1 div 0", &[])).unwrap_err();
        assert!(err.to_string().contains("FOAR0001"), "{err}");
    }
}
