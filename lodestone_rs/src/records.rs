//! Record model for the lodestone index.
//!
//! Every fact the extractors learn about a project is one of the record
//! kinds below, wrapped in a [`Record`] envelope that tags it with the
//! extraction [`Source`] and a [`Confidence`]. The envelope serializes to
//! one JSON object per line in `index.jsonl`:
//!
//! ```json
//! {"kind":"function","data":{...},"source":"syntactic","confidence":"high"}
//! ```

use serde::{Deserialize, Serialize};

/// Which extraction phase produced a record. Variant order is the merge
/// priority: later sources overwrite earlier ones at the same call site.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Syntactic,
    Xref,
    Compiler,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Public,
    Private,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectiveKind {
    Alias,
    Import,
    Require,
    Use,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepType {
    Compile,
    Runtime,
    Export,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssocKind {
    BelongsTo,
    HasOne,
    HasMany,
    ManyToMany,
    EmbedsOne,
    EmbedsMany,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeDefKind {
    Type,
    Typep,
    Opaque,
    Callback,
    Macrocallback,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
    Info,
    Hint,
}

/// A module definition. Unique key: module name.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleDef {
    pub module: String,
    pub file: String,
    pub line: usize,
    #[serde(default)]
    pub end_line: usize,
    /// `@behaviour` module names declared in the body.
    #[serde(default)]
    pub behaviours: Vec<String>,
}

/// A function definition. Unique key: (module, name, arity).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FunctionDef {
    pub module: String,
    pub name: String,
    pub arity: usize,
    pub visibility: Visibility,
    #[serde(default)]
    pub is_macro: bool,
    pub file: String,
    pub line: usize,
    #[serde(default)]
    pub end_line: usize,
}

impl FunctionDef {
    /// `Module.name/arity` form used in queries.
    pub fn mfa(&self) -> String {
        format!("{}.{}/{}", self.module, self.name, self.arity)
    }
}

/// A call site. `callee` is `None` for unresolved local calls found by the
/// syntactic pass; a later phase may contribute the resolved counterpart.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CallRef {
    /// Caller MFA (`Module.name/arity`).
    pub caller: String,
    /// Callee MFA, when resolved.
    pub callee: Option<String>,
    pub file: String,
    pub line: usize,
}

impl CallRef {
    /// Call-site key used for cross-phase deduplication.
    pub fn site_key(&self) -> (String, usize, Option<String>) {
        (self.file.clone(), self.line, self.callee.clone())
    }
}

/// A compile-time directive (`alias`/`import`/`require`/`use`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DirectiveRef {
    pub kind: DirectiveKind,
    /// Module issuing the directive.
    pub module: String,
    /// Target module.
    pub target: String,
    pub file: String,
    pub line: usize,
    /// `as:` rename, when given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub as_alias: Option<String>,
    /// `only:` selectors as `name/arity` strings.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub only: Vec<String>,
    /// `except:` selectors as `name/arity` strings.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub except: Vec<String>,
}

/// One struct field with its rendered default literal.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StructField {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

/// A `defstruct` declaration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StructDef {
    pub module: String,
    pub file: String,
    pub line: usize,
    #[serde(default)]
    pub fields: Vec<StructField>,
}

/// A concrete HTTP route after scope folding.
/// Unique key: (verb, path, controller, action).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    /// Uppercased HTTP verb.
    pub verb: String,
    /// Fully-expanded path, always starting with `/`.
    pub path: String,
    /// Fully-qualified controller module.
    pub controller: String,
    pub action: String,
    /// Router module the route was defined in.
    pub router: String,
    pub file: String,
    pub line: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SchemaField {
    pub name: String,
    /// Rendered type spelling (`:string`, `{:array, :integer}`, ...).
    #[serde(rename = "type")]
    pub field_type: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Association {
    pub kind: AssocKind,
    pub name: String,
    /// Related module, fully resolved where possible.
    pub related: String,
}

/// An ORM schema block. `source` is `None` for embedded schemas.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub module: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub file: String,
    pub line: usize,
    #[serde(default)]
    pub end_line: usize,
    #[serde(default)]
    pub fields: Vec<SchemaField>,
    #[serde(default)]
    pub associations: Vec<Association>,
}

/// A `@spec` annotation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TypeSpec {
    pub module: String,
    pub name: String,
    pub arity: usize,
    /// Rendered parameter-type spellings.
    #[serde(default)]
    pub params: Vec<String>,
    /// Rendered return-type spelling.
    pub return_type: String,
    pub file: String,
    pub line: usize,
}

/// A `@type`/`@typep`/`@opaque`/`@callback`/`@macrocallback` annotation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TypeDef {
    pub module: String,
    pub name: String,
    pub arity: usize,
    pub kind: TypeDefKind,
    /// Parameter names as written.
    #[serde(default)]
    pub params: Vec<String>,
    /// Rendered right-hand side (empty for callbacks without a body).
    pub definition: String,
    pub file: String,
    pub line: usize,
}

/// A compiler diagnostic.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub file: String,
    pub line: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_tag: Option<String>,
}

/// An inter-module dependency edge. Unique key: (from, to, type).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DepEdge {
    pub from: String,
    pub to: String,
    #[serde(rename = "type")]
    pub dep_type: DepType,
}

/// Per-file state stored in the manifest; determines whether a file needs
/// re-extraction.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FileState {
    pub path: String,
    pub mtime: u64,
    pub size: u64,
    /// 128-bit content fingerprint, hex-encoded.
    pub digest: String,
    /// Modules defined in this file.
    #[serde(default)]
    pub modules: Vec<String>,
}

/// Registry of record kinds, used for cross-cutting operations (counting,
/// filtering, wire tags).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Module,
    Function,
    Call,
    Directive,
    Struct,
    Route,
    Schema,
    Spec,
    Type,
    Diagnostic,
    Dep,
}

impl RecordKind {
    pub const ALL: [RecordKind; 11] = [
        RecordKind::Module,
        RecordKind::Function,
        RecordKind::Call,
        RecordKind::Directive,
        RecordKind::Struct,
        RecordKind::Route,
        RecordKind::Schema,
        RecordKind::Spec,
        RecordKind::Type,
        RecordKind::Diagnostic,
        RecordKind::Dep,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Module => "module",
            RecordKind::Function => "function",
            RecordKind::Call => "call",
            RecordKind::Directive => "directive",
            RecordKind::Struct => "struct",
            RecordKind::Route => "route",
            RecordKind::Schema => "schema",
            RecordKind::Spec => "spec",
            RecordKind::Type => "type",
            RecordKind::Diagnostic => "diagnostic",
            RecordKind::Dep => "dep",
        }
    }
}

/// The payload of one index line.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum RecordData {
    Module(ModuleDef),
    Function(FunctionDef),
    Call(CallRef),
    Directive(DirectiveRef),
    Struct(StructDef),
    Route(Route),
    Schema(Schema),
    Spec(TypeSpec),
    Type(TypeDef),
    Diagnostic(Diagnostic),
    Dep(DepEdge),
}

impl RecordData {
    pub fn kind(&self) -> RecordKind {
        match self {
            RecordData::Module(_) => RecordKind::Module,
            RecordData::Function(_) => RecordKind::Function,
            RecordData::Call(_) => RecordKind::Call,
            RecordData::Directive(_) => RecordKind::Directive,
            RecordData::Struct(_) => RecordKind::Struct,
            RecordData::Route(_) => RecordKind::Route,
            RecordData::Schema(_) => RecordKind::Schema,
            RecordData::Spec(_) => RecordKind::Spec,
            RecordData::Type(_) => RecordKind::Type,
            RecordData::Diagnostic(_) => RecordKind::Diagnostic,
            RecordData::Dep(_) => RecordKind::Dep,
        }
    }

    /// The file the record originates from, when it has one. Dependency
    /// edges are project-global and return `None`.
    pub fn file(&self) -> Option<&str> {
        match self {
            RecordData::Module(r) => Some(&r.file),
            RecordData::Function(r) => Some(&r.file),
            RecordData::Call(r) => Some(&r.file),
            RecordData::Directive(r) => Some(&r.file),
            RecordData::Struct(r) => Some(&r.file),
            RecordData::Route(r) => Some(&r.file),
            RecordData::Schema(r) => Some(&r.file),
            RecordData::Spec(r) => Some(&r.file),
            RecordData::Type(r) => Some(&r.file),
            RecordData::Diagnostic(r) => Some(&r.file),
            RecordData::Dep(_) => None,
        }
    }
}

/// One line of the index: payload plus provenance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(flatten)]
    pub data: RecordData,
    pub source: Source,
    pub confidence: Confidence,
}

impl Record {
    pub fn new(data: RecordData, source: Source, confidence: Confidence) -> Self {
        Self {
            data,
            source,
            confidence,
        }
    }

    /// Syntactic-pass record with the default high confidence used for
    /// declarations the parser saw directly.
    pub fn syntactic(data: RecordData) -> Self {
        Self::new(data, Source::Syntactic, Confidence::High)
    }

    pub fn kind(&self) -> RecordKind {
        self.data.kind()
    }

    pub fn file(&self) -> Option<&str> {
        self.data.file()
    }
}
