//! Compiled code unit format and loader.
//!
//! A code unit (.mfc) is the compiled form of one piece of mod code. Besides
//! functions and constants it carries the symbol table the security
//! validator scans: external unit references, declared types, referenced
//! types, and symbol operands on every instruction.
//!
//! ## Format
//!
//! ```text
//! +----------------+
//! | Magic (4 bytes)|  "MFC\x01" (version 1), optional
//! +----------------+
//! | Header         |  metadata, references
//! +----------------+
//! | Type table     |  definitions and references
//! +----------------+
//! | Constant Pool  |
//! +----------------+
//! | Functions      |
//! +----------------+
//! ```
//!
//! The body after the magic is a JSON document.

use crate::error::{RuntimeError, RuntimeResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;

/// Magic bytes for compiled code units.
pub const MAGIC: &[u8; 4] = b"MFC\x01";

/// File extension of compiled code units.
pub const UNIT_EXTENSION: &str = "mfc";

/// Separator between a type name and a member name.
pub const MEMBER_SEPARATOR: &str = "::";

/// Compiled code unit representation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bytecode {
    /// Version of the bytecode format.
    pub version: u8,

    /// Unit metadata embedded in bytecode.
    pub metadata: BytecodeMetadata,

    /// External units this unit links against.
    #[serde(default)]
    pub references: Vec<UnitReference>,

    /// Types defined by this unit.
    #[serde(default)]
    pub types: Vec<TypeDefinition>,

    /// External types referenced by this unit.
    #[serde(default)]
    pub type_refs: Vec<String>,

    /// Constant pool.
    #[serde(default)]
    pub constants: Vec<Constant>,

    /// Function definitions.
    #[serde(default)]
    pub functions: Vec<Function>,

    /// Entry point function name, for units that have one.
    #[serde(default)]
    pub entry_point: Option<String>,
}

/// Metadata embedded in bytecode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BytecodeMetadata {
    /// Unit name other units reference this one by.
    pub unit_name: String,

    /// Unit version.
    pub unit_version: String,

    /// Compilation timestamp.
    #[serde(default)]
    pub compiled_at: Option<String>,

    /// Compiler version.
    #[serde(default)]
    pub compiler_version: Option<String>,
}

/// A reference to another code unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitReference {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

/// A type defined in a code unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeDefinition {
    /// Fully qualified name, e.g. `BetterMaps.Hud`.
    pub name: String,

    /// Base type, if any.
    #[serde(default)]
    pub base: Option<String>,

    /// Capability tags this type implements.
    #[serde(default)]
    pub implements: Vec<String>,
}

/// A constant value in the constant pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Constant {
    /// Null value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// Float value.
    Float(f64),
    /// String value.
    String(String),
}

/// A function definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Function {
    /// Function name.
    pub name: String,

    /// Declaring type, if the function is a method.
    #[serde(default)]
    pub owner: Option<String>,

    /// Parameter names.
    #[serde(default)]
    pub params: Vec<String>,

    /// Instructions.
    pub instructions: Vec<Instruction>,

    /// Local variable count.
    #[serde(default)]
    pub local_count: usize,
}

impl Function {
    /// Qualified name used as the container of symbols found in this body.
    pub fn qualified_name(&self) -> String {
        match &self.owner {
            Some(owner) => format!("{}{}{}", owner, MEMBER_SEPARATOR, self.name),
            None => self.name.clone(),
        }
    }
}

/// A bytecode instruction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum Instruction {
    /// Load a constant from the pool.
    LoadConst { index: usize },

    /// Load a local variable.
    LoadLocal { index: usize },

    /// Store to a local variable.
    StoreLocal { index: usize },

    /// Call a static member, `ns.Type::member`.
    Call { name: String, arg_count: usize },

    /// Call an instance member, `ns.Type::member`.
    CallMethod { name: String, arg_count: usize },

    /// Construct an instance of a type.
    NewObject { type_name: String, arg_count: usize },

    /// Read a field, `ns.Type::field`.
    LoadField { field: String },

    /// Write a field, `ns.Type::field`.
    StoreField { field: String },

    /// Push a runtime type token.
    LoadType { type_name: String },

    /// Return from function.
    Return,

    /// Jump to offset.
    Jump { offset: i32 },

    /// Jump if top of stack is false.
    JumpIfFalse { offset: i32 },

    /// Pop value from stack.
    Pop,

    /// Duplicate top of stack.
    Dup,

    /// Binary add.
    Add,

    /// Binary subtract.
    Sub,

    /// Comparison: equal.
    Eq,

    /// Logical not.
    Not,

    /// Await an async value.
    Await,

    /// No operation.
    Nop,
}

impl Instruction {
    /// Symbol operand carried by this instruction, if any.
    pub fn symbol(&self) -> Option<(SymbolKind, &str)> {
        match self {
            Instruction::Call { name, .. } | Instruction::CallMethod { name, .. } => {
                Some((SymbolKind::Method, name))
            }
            Instruction::LoadField { field } | Instruction::StoreField { field } => {
                Some((SymbolKind::Field, field))
            }
            Instruction::NewObject { type_name, .. } | Instruction::LoadType { type_name } => {
                Some((SymbolKind::Type, type_name))
            }
            _ => None,
        }
    }
}

/// What a symbol table entry refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    /// Another code unit.
    Unit,
    /// A type.
    Type,
    /// A method call site.
    Method,
    /// A field access.
    Field,
}

/// One statically discovered symbol reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolRef {
    pub kind: SymbolKind,
    /// The referenced symbol.
    pub symbol: String,
    /// The unit, type or function the reference appears in.
    pub container: String,
    /// Human readable location inside the container.
    pub location: String,
}

impl SymbolRef {
    /// Declaring type of a member symbol, or the symbol itself for types.
    pub fn type_name(&self) -> Option<&str> {
        match self.kind {
            SymbolKind::Unit => None,
            SymbolKind::Type => Some(&self.symbol),
            SymbolKind::Method | SymbolKind::Field => Some(
                self.symbol
                    .split_once(MEMBER_SEPARATOR)
                    .map(|(ty, _)| ty)
                    .unwrap_or(&self.symbol),
            ),
        }
    }

    /// Namespace of the referenced type.
    pub fn namespace(&self) -> Option<&str> {
        self.type_name().and_then(namespace_of)
    }
}

impl fmt::Display for SymbolRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} in {} ({})", self.symbol, self.container, self.location)
    }
}

/// Namespace portion of a fully qualified type name.
pub fn namespace_of(type_name: &str) -> Option<&str> {
    type_name.rsplit_once('.').map(|(ns, _)| ns)
}

impl Bytecode {
    /// Unit name from the embedded metadata.
    pub fn name(&self) -> &str {
        &self.metadata.unit_name
    }

    /// Statically enumerate every symbol this unit references.
    ///
    /// Nothing is executed; the table is read straight from the unit.
    pub fn symbols(&self) -> Vec<SymbolRef> {
        let unit = self.name().to_string();
        let mut symbols = Vec::new();

        for reference in &self.references {
            symbols.push(SymbolRef {
                kind: SymbolKind::Unit,
                symbol: reference.name.clone(),
                container: unit.clone(),
                location: "references".to_string(),
            });
        }

        for (index, type_ref) in self.type_refs.iter().enumerate() {
            symbols.push(SymbolRef {
                kind: SymbolKind::Type,
                symbol: type_ref.clone(),
                container: unit.clone(),
                location: format!("type_refs[{}]", index),
            });
        }

        for def in &self.types {
            if let Some(base) = &def.base {
                symbols.push(SymbolRef {
                    kind: SymbolKind::Type,
                    symbol: base.clone(),
                    container: def.name.clone(),
                    location: "base type".to_string(),
                });
            }
        }

        for function in &self.functions {
            let container = function.qualified_name();
            for (offset, instruction) in function.instructions.iter().enumerate() {
                if let Some((kind, symbol)) = instruction.symbol() {
                    symbols.push(SymbolRef {
                        kind,
                        symbol: symbol.to_string(),
                        container: container.clone(),
                        location: format!("instruction {}", offset),
                    });
                }
            }
        }

        symbols
    }
}

/// Bytecode loader.
pub struct BytecodeLoader;

impl BytecodeLoader {
    /// Read a code unit fully into memory.
    ///
    /// The file is not kept open or mapped, so it may be replaced or
    /// deleted while the unit stays loaded.
    pub fn read(path: &Path) -> RuntimeResult<Vec<u8>> {
        if !path.exists() {
            return Err(RuntimeError::BytecodeError(format!(
                "Code unit not found: {}",
                path.display()
            )));
        }
        Ok(std::fs::read(path)?)
    }

    /// Load bytecode from a file.
    pub fn load(path: &Path) -> RuntimeResult<Bytecode> {
        let content = Self::read(path)?;
        Self::parse(&content)
    }

    /// Parse bytecode from bytes.
    pub fn parse(bytes: &[u8]) -> RuntimeResult<Bytecode> {
        // Check for magic bytes
        if bytes.len() < 4 {
            return Err(RuntimeError::BytecodeError(
                "File too small to be valid bytecode".to_string(),
            ));
        }

        if &bytes[0..4] == MAGIC {
            Self::parse_json(&bytes[4..])
        } else {
            // Bare JSON (development/debug format)
            Self::parse_json(bytes)
        }
    }

    /// Parse JSON bytecode format.
    fn parse_json(bytes: &[u8]) -> RuntimeResult<Bytecode> {
        let content = std::str::from_utf8(bytes)
            .map_err(|e| RuntimeError::BytecodeError(format!("Invalid UTF-8: {}", e)))?;

        serde_json::from_str(content)
            .map_err(|e| RuntimeError::BytecodeError(format!("Invalid bytecode JSON: {}", e)))
    }

    /// Serialize bytecode with the magic header.
    pub fn encode(bytecode: &Bytecode) -> RuntimeResult<Vec<u8>> {
        let mut bytes = MAGIC.to_vec();
        bytes.extend(serde_json::to_vec(bytecode)?);
        Ok(bytes)
    }

    /// Validate bytecode structure.
    pub fn validate(bytecode: &Bytecode) -> RuntimeResult<()> {
        // Check version
        if bytecode.version != 1 {
            return Err(RuntimeError::BytecodeError(format!(
                "Unsupported bytecode version: {}",
                bytecode.version
            )));
        }

        if bytecode.metadata.unit_name.is_empty() {
            return Err(RuntimeError::BytecodeError(
                "Unit name cannot be empty".to_string(),
            ));
        }

        // Check entry point exists
        if let Some(entry_point) = &bytecode.entry_point {
            let has_entry = bytecode.functions.iter().any(|f| &f.name == entry_point);
            if !has_entry {
                return Err(RuntimeError::BytecodeError(format!(
                    "Entry point function '{}' not found",
                    entry_point
                )));
            }
        }

        let declared: HashSet<&str> = bytecode.types.iter().map(|t| t.name.as_str()).collect();
        for function in &bytecode.functions {
            if let Some(owner) = &function.owner {
                if !declared.contains(owner.as_str()) {
                    return Err(RuntimeError::BytecodeError(format!(
                        "Function '{}' is owned by undeclared type '{}'",
                        function.name, owner
                    )));
                }
            }
        }

        Ok(())
    }
}
