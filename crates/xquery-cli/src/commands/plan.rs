use crate::util::QuerySource;
use anyhow::Context;
use clap::Args;
use platynui_xquery::CompileChain;
use platynui_xquery::ast::dot::to_dot;

#[derive(Args, Debug, Clone)]
pub struct PlanArgs {
    #[command(flatten)]
    pub source: QuerySource,
    /// Print Graphviz DOT instead of the bracketed tree.
    #[arg(long)]
    pub dot: bool,
}

pub fn run(args: &PlanArgs) -> anyhow::Result<String> {
    let query = args.source.read()?;
    let ast = CompileChain::new().optimize(&query)?;
    let root = ast.root().context("parser returned an empty tree")?;
    Ok(if args.dot { to_dot(&ast, root) } else { ast.display(root) })
}
