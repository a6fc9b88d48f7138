//! XQuery compiler and pull-based execution core.
//!
//! Queries go through [`parse`], an [`Optimizer`] that rewrites FLWOR clauses into pipe
//! operators, and a [`Translator`] that produces a [`Module`]. [`CompileChain`] runs the three
//! in sequence and hands back a [`Query`].

pub mod ast;
pub mod compile;
pub mod consts;
pub mod error;
pub mod model;
pub mod module;
pub mod optimizer;
pub mod parser;
pub mod runtime;
pub mod simple_node;
pub mod store;
pub mod translator;
pub mod update;
pub mod xdm;

pub use ast::{Ast, AstKind, NodeId};
pub use compile::{CompileChain, CompileOptions, CompileOptionsBuilder, Query, compile_xquery};
pub use error::{Error, ErrorCode};
pub use model::{NodeHandle, NodeKind, QName, XdmNode};
pub use module::{BaseResolver, Module, ModuleResolver};
pub use optimizer::{DefaultOptimizer, Optimizer};
pub use parser::parse;
pub use runtime::{QueryContext, QueryContextBuilder};
pub use simple_node::{SimpleNode, SimpleNodeBuilder, attr, comment, doc as simple_doc, elem, text};
pub use store::{Collection, MemoryCollection, MemoryStore, Store, SubtreeParser};
pub use translator::{PipelineTranslator, Translator};
pub use update::{UpdateApplier, UpdateKind, UpdateList, UpdateOp};
pub use xdm::{XdmAtomicValue, XdmItem, XdmSequence};
