// Type tables for table columns: primitive types, the built-in read-data profile, and
// a small declaration language for extra schema files.
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::error::{Error, ErrorKind, io_error_kind};

/// Name of the phred-33 text quality type the read iterator casts to.
pub const QUALITY_TEXT_PHRED_33: &str = "INSDC:quality:text:phred_33";
/// Numeric phred quality type as usually stored on disk.
pub const QUALITY_PHRED: &str = "INSDC:quality:phred";

const SRA_PROFILE: &str = r#"
version 1;

// quality scores
typedef U8 INSDC:quality:phred;
typedef U8 INSDC:quality:log_odds;
typedef ascii INSDC:quality:text:phred_33;
typedef ascii INSDC:quality:text:phred_64;

// bases
typedef ascii INSDC:dna:text;
typedef U8 INSDC:2na:bin;
typedef U8 INSDC:4na:bin;
typedef U8 INSDC:x2na:bin;
typedef ascii INSDC:color:text;

// coordinates
typedef U32 INSDC:coord:len;
typedef I32 INSDC:coord:zero;
typedef I32 INSDC:coord:one;
typedef U32 INSDC:coord:val;

// read metadata
typedef U8 INSDC:SRA:platform_id;
typedef U8 INSDC:SRA:xread_type;
typedef U8 INSDC:SRA:read_type;
typedef U8 INSDC:SRA:read_filter;
typedef ascii INSDC:SRA:spotname;
"#;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    Bool,
    Uint,
    Int,
    Float,
    Ascii,
    Unicode,
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Bool => "bool",
            Domain::Uint => "uint",
            Domain::Int => "int",
            Domain::Float => "float",
            Domain::Ascii => "ascii",
            Domain::Unicode => "unicode",
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TypeDesc {
    pub intrinsic_bits: u32,
    pub intrinsic_dim: u32,
    pub domain: Domain,
}

impl TypeDesc {
    pub const fn new(intrinsic_bits: u32, intrinsic_dim: u32, domain: Domain) -> Self {
        Self {
            intrinsic_bits,
            intrinsic_dim,
            domain,
        }
    }

    /// Width of one element in bits (`intrinsic_bits * intrinsic_dim`); `None` on overflow.
    pub fn element_bits(&self) -> Option<u32> {
        self.intrinsic_bits.checked_mul(self.intrinsic_dim)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Schema {
    types: BTreeMap<String, TypeDesc>,
}

impl Schema {
    /// A schema that knows no types at all.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn primitives() -> Self {
        let mut types = BTreeMap::new();
        let primitives = [
            ("bool", TypeDesc::new(8, 1, Domain::Bool)),
            ("U8", TypeDesc::new(8, 1, Domain::Uint)),
            ("U16", TypeDesc::new(16, 1, Domain::Uint)),
            ("U32", TypeDesc::new(32, 1, Domain::Uint)),
            ("U64", TypeDesc::new(64, 1, Domain::Uint)),
            ("I8", TypeDesc::new(8, 1, Domain::Int)),
            ("I16", TypeDesc::new(16, 1, Domain::Int)),
            ("I32", TypeDesc::new(32, 1, Domain::Int)),
            ("I64", TypeDesc::new(64, 1, Domain::Int)),
            ("F32", TypeDesc::new(32, 1, Domain::Float)),
            ("F64", TypeDesc::new(64, 1, Domain::Float)),
            ("ascii", TypeDesc::new(8, 1, Domain::Ascii)),
            ("utf8", TypeDesc::new(8, 1, Domain::Unicode)),
        ];
        for (name, desc) in primitives {
            types.insert(name.to_string(), desc);
        }
        Self { types }
    }

    /// Primitive types plus the INSDC read-data profile.
    pub fn sra() -> Result<Self, Error> {
        let mut schema = Self::primitives();
        schema.parse_text(SRA_PROFILE, "builtin:sra")?;
        Ok(schema)
    }

    /// Adds every type of `other`, replacing same-named entries.
    pub fn merge(&mut self, other: &Schema) {
        for (name, desc) in &other.types {
            self.types.insert(name.clone(), *desc);
        }
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    /// Resolves a type declaration such as `U32` or `INSDC:coord:len[2]`.
    pub fn type_desc(&self, decl: &str) -> Option<TypeDesc> {
        let (name, dim) = split_decl(decl).ok()?;
        let desc = self.types.get(&name)?;
        Some(TypeDesc {
            intrinsic_dim: desc.intrinsic_dim.checked_mul(dim)?,
            ..*desc
        })
    }

    pub fn typedecl_to_text(&self, decl: &str) -> Result<String, Error> {
        let (name, dim) = split_decl(decl)?;
        if !self.types.contains_key(&name) {
            return Err(Error::new(ErrorKind::NotFound)
                .with_message(format!("unknown type '{name}' in schema")));
        }
        if dim > 1 {
            Ok(format!("{name}[{dim}]"))
        } else {
            Ok(name)
        }
    }

    pub fn parse_file(&mut self, path: &Path) -> Result<(), Error> {
        let text = std::fs::read_to_string(path).map_err(|err| {
            Error::new(io_error_kind(&err))
                .with_message("failed to read schema file")
                .with_path(path)
                .with_source(err)
        })?;
        let origin = path.display().to_string();
        self.parse_text(&text, &origin).map_err(|err| err.with_path(path))
    }

    /// Parses declarations into this schema. Nothing is added unless the whole text parses.
    pub fn parse_text(&mut self, text: &str, origin: &str) -> Result<(), Error> {
        let mut staged = self.types.clone();
        for (line, statement) in statements(text, origin)? {
            let tokens: Vec<&str> = statement.split_whitespace().collect();
            match tokens.as_slice() {
                ["version", number] => {
                    if number.parse::<f32>().is_err() {
                        return Err(parse_error(origin, line, "invalid version number"));
                    }
                }
                ["typedef", base, name] => {
                    if !is_type_name(name) {
                        return Err(parse_error(origin, line, "invalid type name"));
                    }
                    let (base_name, dim) = split_decl(base)
                        .map_err(|_| parse_error(origin, line, "invalid base type"))?;
                    let base_desc = staged.get(&base_name).copied().ok_or_else(|| {
                        parse_error(origin, line, &format!("unknown base type '{base_name}'"))
                    })?;
                    let intrinsic_dim = base_desc
                        .intrinsic_dim
                        .checked_mul(dim)
                        .ok_or_else(|| parse_error(origin, line, "dimension overflows"))?;
                    staged.insert(
                        name.to_string(),
                        TypeDesc {
                            intrinsic_dim,
                            ..base_desc
                        },
                    );
                }
                _ => return Err(parse_error(origin, line, "unsupported statement")),
            }
        }
        self.types = staged;
        Ok(())
    }
}

fn parse_error(origin: &str, line: usize, message: &str) -> Error {
    Error::new(ErrorKind::Corrupt).with_message(format!("{origin}:{line}: {message}"))
}

fn statements(text: &str, origin: &str) -> Result<Vec<(usize, String)>, Error> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut start_line: Option<usize> = None;
    for (idx, raw) in text.lines().enumerate() {
        let line = strip_comment(raw);
        for ch in line.chars() {
            if ch == ';' {
                let statement = current.trim();
                if !statement.is_empty() {
                    out.push((start_line.unwrap_or(idx + 1), statement.to_string()));
                }
                current.clear();
                start_line = None;
            } else {
                if start_line.is_none() && !ch.is_whitespace() {
                    start_line = Some(idx + 1);
                }
                current.push(ch);
            }
        }
        current.push(' ');
    }
    if let Some(line) = start_line {
        return Err(parse_error(origin, line, "missing ';'"));
    }
    Ok(out)
}

fn strip_comment(line: &str) -> &str {
    if line.trim_start().starts_with('#') {
        return "";
    }
    match line.find("//") {
        Some(pos) => &line[..pos],
        None => line,
    }
}

fn split_decl(decl: &str) -> Result<(String, u32), Error> {
    let compact: String = decl.chars().filter(|ch| !ch.is_whitespace()).collect();
    let invalid = || {
        Error::new(ErrorKind::Usage).with_message(format!("invalid type declaration '{decl}'"))
    };
    let (name, dim) = match compact.find('[') {
        Some(open) => {
            let rest = compact[open + 1..].strip_suffix(']').ok_or_else(invalid)?;
            let dim: u32 = rest.parse().map_err(|_| invalid())?;
            if dim == 0 {
                return Err(invalid());
            }
            (compact[..open].to_string(), dim)
        }
        None => (compact, 1),
    };
    if !is_type_name(&name) {
        return Err(invalid());
    }
    Ok((name, dim))
}

fn is_type_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with(':')
        && !name.ends_with(':')
        && name
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == ':')
}
