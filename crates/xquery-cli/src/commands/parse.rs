use crate::util::QuerySource;
use anyhow::Context;
use clap::Args;
use platynui_xquery::ast::dot::to_dot;
use platynui_xquery::parse;

#[derive(Args, Debug, Clone)]
pub struct ParseArgs {
    #[command(flatten)]
    pub source: QuerySource,
    /// Print Graphviz DOT instead of the bracketed tree.
    #[arg(long)]
    pub dot: bool,
}

pub fn run(args: &ParseArgs) -> anyhow::Result<String> {
    let query = args.source.read()?;
    let ast = parse(&query)?;
    let root = ast.root().context("parser returned an empty tree")?;
    Ok(if args.dot { to_dot(&ast, root) } else { ast.display(root) })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(query: &str, dot: bool) -> ParseArgs {
        ParseArgs { source: QuerySource { query: Some(query.to_string()), file: None }, dot }
    }

    #[test]
    fn prints_the_tree() {
        let out = run(&args("1 + 2", false)).unwrap();
        assert!(out.contains("ArithmeticExpr(AddOp, Int[1], Int[2])"), "{out}");
    }

    #[test]
    fn prints_dot() {
        assert!(run(&args("1", true)).unwrap().starts_with("digraph AST {"));
    }

    #[test]
    fn reports_syntax_errors() {
        let err = run(&args("1 +", false)).unwrap_err();
        assert!(err.to_string().contains("XPST0003"), "{err}");
    }
}
