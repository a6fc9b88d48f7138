//! Node-type tags of the abstract syntax tree.
//!
//! Core kinds form a closed enum whose numeric ids are their declaration index. Extension
//! modules obtain additional ids from a process-wide allocator; those ids live in a reserved
//! range starting at [`EXTENSION_BASE`] and never collide with core kinds.

use core::fmt;
use std::ops::Range;
use std::sync::{Mutex, PoisonError};

/// First id handed out to extension kinds.
pub const EXTENSION_BASE: u32 = 1 << 16;

macro_rules! ast_kinds {
    ($($kind:ident),* $(,)?) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum AstKind {
            $($kind,)*
            /// Kind allocated at runtime through [`allocate_kinds`].
            Extension(u32),
        }

        impl AstKind {
            /// Every core kind, ordered by numeric id.
            pub const CORE: &'static [AstKind] = &[$(AstKind::$kind),*];

            const NAMES: &'static [&'static str] = &[$(stringify!($kind)),*];
        }
    };
}

ast_kinds! {
    // Modules and prolog
    XQuery,
    MainModule,
    LibraryModule,
    Prolog,
    QueryBody,
    NamespaceDeclaration,
    DefaultElementNamespace,
    DefaultFunctionNamespace,
    BoundarySpaceDeclaration,
    CollationDeclaration,
    BaseURIDeclaration,
    ConstructionDeclaration,
    OrderingModeDeclaration,
    EmptyOrderDeclaration,
    CopyNamespacesDeclaration,
    DecimalFormatDeclaration,
    DecimalFormatProperty,
    SchemaImport,
    ModuleImport,
    ContextItemDeclaration,
    VariableDeclaration,
    FunctionDecl,
    OptionDeclaration,
    Annotation,
    ExternalVariable,
    TypedVariableDeclaration,
    // FLWOR
    FlowrExpr,
    ForClause,
    LetClause,
    TumblingWindowClause,
    SlidingWindowClause,
    WindowStartCondition,
    WindowEndCondition,
    WindowVars,
    CurrentItem,
    PreviousItem,
    NextItem,
    PositionalVar,
    WhereClause,
    GroupByClause,
    GroupBySpec,
    OrderByClause,
    OrderBySpec,
    OrderByKind,
    OrderByEmptyMode,
    Collation,
    CountClause,
    ReturnClause,
    TypedVariableBinding,
    Variable,
    AllowingEmpty,
    // Expressions
    SequenceExpr,
    QuantifiedExpr,
    SomeQuantifier,
    EveryQuantifier,
    SwitchExpr,
    SwitchClause,
    TypeSwitch,
    TypeSwitchCase,
    IfExpr,
    TryCatchExpr,
    CatchClause,
    CatchErrorList,
    CatchVar,
    OrExpr,
    AndExpr,
    ComparisonExpr,
    GeneralCompEQ,
    GeneralCompNE,
    GeneralCompLT,
    GeneralCompLE,
    GeneralCompGT,
    GeneralCompGE,
    ValueCompEQ,
    ValueCompNE,
    ValueCompLT,
    ValueCompLE,
    ValueCompGT,
    ValueCompGE,
    NodeCompIs,
    NodeCompPrecedes,
    NodeCompFollows,
    RangeExpr,
    ArithmeticExpr,
    AddOp,
    SubtractOp,
    MultiplyOp,
    DivideOp,
    IDivideOp,
    ModulusOp,
    UnionExpr,
    IntersectExpr,
    ExceptExpr,
    InstanceofExpr,
    TreatExpr,
    CastableExpr,
    CastExpr,
    ValidateExpr,
    ExtensionExpr,
    Pragma,
    PathExpr,
    RootPath,
    StepExpr,
    AxisSpec,
    NameTest,
    Predicate,
    FilterExpr,
    DynamicFunctionCallExpr,
    ArgumentPlaceHolder,
    FunctionCall,
    ContextItemExpr,
    OrderedExpr,
    UnorderedExpr,
    EmptySequence,
    VariableRef,
    Int,
    Dec,
    Dbl,
    Str,
    QNm,
    AnyURI,
    // Types
    SequenceType,
    EmptySequenceType,
    ItemType,
    AtomicOrUnionType,
    CardinalityZeroOrOne,
    CardinalityZeroOrMany,
    CardinalityOneOrMany,
    AnyKindType,
    DocumentType,
    ElementType,
    AttributeType,
    SchemaElementType,
    SchemaAttributeType,
    PIType,
    CommentType,
    TextType,
    NamespaceNodeType,
    AnyFunctionType,
    TypedFunctionType,
    // Constructors and function items
    DirElementConstructor,
    DirAttributeConstructor,
    DirCommentConstructor,
    DirPIConstructor,
    CompDocumentConstructor,
    CompElementConstructor,
    CompAttributeConstructor,
    CompNamespaceConstructor,
    CompTextConstructor,
    CompCommentConstructor,
    CompPIConstructor,
    ContentSequence,
    LiteralFuncItem,
    InlineFuncItem,
    // Update facility
    InsertExpr,
    InsertInto,
    InsertFirst,
    InsertLast,
    InsertBefore,
    InsertAfter,
    DeleteExpr,
    RenameExpr,
    ReplaceNodeExpr,
    ReplaceValueExpr,
    TransformExpr,
    CopyVariableBinding,
    // Pipe forms
    ReturnExpr,
    Start,
    ForBind,
    LetBind,
    Selection,
    OrderBy,
    GroupBy,
    Count,
    Join,
    JoinClause,
    End,
}

struct ExtensionKinds {
    names: Vec<&'static str>,
}

static EXTENSIONS: Mutex<ExtensionKinds> = Mutex::new(ExtensionKinds { names: Vec::new() });

/// Reserve a contiguous block of fresh kind ids, one per name. Safe to call from concurrently
/// loading extension modules; blocks never overlap.
pub fn allocate_kinds(names: &[&'static str]) -> Range<u32> {
    let mut ext = EXTENSIONS.lock().unwrap_or_else(PoisonError::into_inner);
    let start = EXTENSION_BASE + index_to_id(ext.names.len());
    ext.names.extend_from_slice(names);
    start..start + index_to_id(names.len())
}

fn index_to_id(index: usize) -> u32 {
    u32::try_from(index).unwrap_or(u32::MAX - EXTENSION_BASE)
}

impl AstKind {
    pub fn id(self) -> u32 {
        match self {
            AstKind::Extension(id) => id,
            core => index_to_id(Self::CORE.iter().position(|k| *k == core).unwrap_or_default()),
        }
    }

    pub fn from_id(id: u32) -> Option<AstKind> {
        if id >= EXTENSION_BASE {
            let ext = EXTENSIONS.lock().unwrap_or_else(PoisonError::into_inner);
            let allocated = index_to_id(ext.names.len());
            return (id - EXTENSION_BASE < allocated).then_some(AstKind::Extension(id));
        }
        Self::CORE.get(id as usize).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            AstKind::Extension(id) => {
                let ext = EXTENSIONS.lock().unwrap_or_else(PoisonError::into_inner);
                ext.names.get(id.saturating_sub(EXTENSION_BASE) as usize).copied().unwrap_or("Extension")
            }
            core => Self::NAMES[core.id() as usize],
        }
    }

    pub fn is_general_comparison(self) -> bool {
        matches!(
            self,
            AstKind::GeneralCompEQ
                | AstKind::GeneralCompNE
                | AstKind::GeneralCompLT
                | AstKind::GeneralCompLE
                | AstKind::GeneralCompGT
                | AstKind::GeneralCompGE
        )
    }

    pub fn is_value_comparison(self) -> bool {
        matches!(
            self,
            AstKind::ValueCompEQ
                | AstKind::ValueCompNE
                | AstKind::ValueCompLT
                | AstKind::ValueCompLE
                | AstKind::ValueCompGT
                | AstKind::ValueCompGE
        )
    }

    /// Operators of the pipe form whose last child is the downstream continuation.
    pub fn is_pipe_operator(self) -> bool {
        matches!(
            self,
            AstKind::ForBind
                | AstKind::LetBind
                | AstKind::Selection
                | AstKind::OrderBy
                | AstKind::GroupBy
                | AstKind::Count
                | AstKind::Join
        )
    }
}

impl fmt::Display for AstKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_core_kind_matches_its_name() {
        assert_eq!(AstKind::CORE.len(), AstKind::NAMES.len());
        for (index, kind) in AstKind::CORE.iter().enumerate() {
            assert_eq!(kind.id() as usize, index);
            assert_eq!(kind.name(), format!("{kind:?}"));
            assert_eq!(AstKind::from_id(kind.id()), Some(*kind));
        }
    }

    #[test]
    fn extension_blocks_do_not_overlap() {
        let a = allocate_kinds(&["MyScan", "MyLookup"]);
        let b = allocate_kinds(&["OtherScan"]);
        assert_eq!(a.len(), 2);
        assert_eq!(b.len(), 1);
        assert!(a.end <= b.start || b.end <= a.start);
        assert!(a.start >= EXTENSION_BASE);
        assert_eq!(AstKind::Extension(a.start).name(), "MyScan");
        assert_eq!(AstKind::Extension(b.start).name(), "OtherScan");
        assert_eq!(AstKind::from_id(b.start), Some(AstKind::Extension(b.start)));
    }

    #[test]
    fn concurrent_allocation_yields_disjoint_ranges() {
        let handles: Vec<_> = (0..8).map(|_| std::thread::spawn(|| allocate_kinds(&["A", "B", "C"]))).collect();
        let mut ranges: Vec<Range<u32>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        ranges.sort_by_key(|r| r.start);
        for pair in ranges.windows(2) {
            assert!(pair[0].end <= pair[1].start);
        }
    }
}
