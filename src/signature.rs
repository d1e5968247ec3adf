//! Recursive-descent parser for JVM class, method, and field signatures.
//!
//! The same grammar covers erased descriptors and generic signatures, so a
//! descriptor without `<` or type variables parses to the tree a plain
//! descriptor decoder would produce. Every tree renders back to the exact
//! text it was parsed from.

use std::fmt;

use crate::errors::{SignatureError, SignatureResult};
use crate::types::{BaseType, dotted_name};

/// Which production a signature string is parsed with.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum SignatureKind {
    Class,
    Method,
    Field,
}

/// Parsed type tree.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum JavaType {
    Base(BaseType),
    Class(ClassTypeSignature),
    /// Element is never an array; consecutive `[` collapse into `dimensions`.
    Array {
        dimensions: u32,
        element: Box<JavaType>,
    },
    TypeVariable(String),
    Wildcard(Wildcard),
}

/// Wildcard type argument.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum Wildcard {
    Unbounded,
    Extends(Box<JavaType>),
    Super(Box<JavaType>),
}

/// `L` class type, possibly with inner-class segments and type arguments.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct ClassTypeSignature {
    /// The first segment holds the full slashed package path.
    pub(crate) segments: Vec<ClassSegment>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct ClassSegment {
    pub(crate) name: String,
    pub(crate) arguments: Vec<JavaType>,
}

/// Formal type parameter `name:classBound:interfaceBound...`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct TypeParameter {
    pub(crate) name: String,
    pub(crate) class_bound: Option<JavaType>,
    pub(crate) interface_bounds: Vec<JavaType>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct ClassSignature {
    pub(crate) type_parameters: Vec<TypeParameter>,
    pub(crate) superclass: ClassTypeSignature,
    pub(crate) interfaces: Vec<ClassTypeSignature>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct MethodSignature {
    pub(crate) type_parameters: Vec<TypeParameter>,
    pub(crate) parameters: Vec<JavaType>,
    pub(crate) return_type: JavaType,
    pub(crate) throws: Vec<JavaType>,
}

/// Result of parsing one signature string.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum ParsedSignature {
    Class(ClassSignature),
    Method(MethodSignature),
    Field(JavaType),
}

impl ParsedSignature {
    pub(crate) fn type_parameters(&self) -> &[TypeParameter] {
        match self {
            ParsedSignature::Class(signature) => &signature.type_parameters,
            ParsedSignature::Method(signature) => &signature.type_parameters,
            ParsedSignature::Field(_) => &[],
        }
    }
}

/// Parse `signature` with the production selected by `kind`.
pub(crate) fn parse_signature(signature: &str, kind: SignatureKind) -> SignatureResult<ParsedSignature> {
    let mut cursor = Cursor::new(signature);
    let parsed = match kind {
        SignatureKind::Class => ParsedSignature::Class(cursor.class_signature()?),
        SignatureKind::Method => ParsedSignature::Method(cursor.method_signature()?),
        SignatureKind::Field => ParsedSignature::Field(cursor.field_type()?),
    };
    cursor.finish()?;
    Ok(parsed)
}

pub(crate) fn parse_field_signature(signature: &str) -> SignatureResult<JavaType> {
    let mut cursor = Cursor::new(signature);
    let field = cursor.field_type()?;
    cursor.finish()?;
    Ok(field)
}

pub(crate) fn parse_method_signature(signature: &str) -> SignatureResult<MethodSignature> {
    let mut cursor = Cursor::new(signature);
    let method = cursor.method_signature()?;
    cursor.finish()?;
    Ok(method)
}

pub(crate) fn parse_class_signature(signature: &str) -> SignatureResult<ClassSignature> {
    let mut cursor = Cursor::new(signature);
    let class = cursor.class_signature()?;
    cursor.finish()?;
    Ok(class)
}

/// Single index into the signature text.
struct Cursor<'a> {
    text: &'a str,
    position: usize,
}

impl<'a> Cursor<'a> {
    fn new(text: &'a str) -> Self {
        Self { text, position: 0 }
    }

    fn peek(&self) -> Option<u8> {
        self.text.as_bytes().get(self.position).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let byte = self.peek()?;
        self.position += 1;
        Some(byte)
    }

    fn error(&self, reason: impl Into<String>) -> SignatureError {
        SignatureError::Malformed {
            signature: self.text.to_string(),
            position: self.position,
            reason: reason.into(),
        }
    }

    fn expect(&mut self, expected: u8) -> SignatureResult<()> {
        match self.peek() {
            Some(byte) if byte == expected => {
                self.position += 1;
                Ok(())
            }
            Some(byte) => Err(self.error(format!(
                "expected '{}' but found '{}'",
                expected as char, byte as char
            ))),
            None => Err(self.error(format!("expected '{}' but input ended", expected as char))),
        }
    }

    fn finish(&self) -> SignatureResult<()> {
        if self.position == self.text.len() {
            Ok(())
        } else {
            Err(self.error("trailing characters"))
        }
    }

    /// Read a non-empty identifier up to, not including, one of `terminators`.
    fn identifier(&mut self, terminators: &[u8]) -> SignatureResult<String> {
        let start = self.position;
        loop {
            match self.peek() {
                Some(byte) if terminators.contains(&byte) => break,
                Some(b'<' | b'>' | b';' | b':' | b'.' | b'[' | b'(' | b')') => {
                    return Err(self.error("unexpected delimiter in identifier"));
                }
                Some(_) => self.position += 1,
                None => return Err(self.error("truncated identifier")),
            }
        }
        if self.position == start {
            return Err(self.error("empty identifier"));
        }
        Ok(self.text[start..self.position].to_string())
    }

    fn class_signature(&mut self) -> SignatureResult<ClassSignature> {
        let type_parameters = self.optional_type_parameters()?;
        let superclass = self.class_type()?;
        let mut interfaces = Vec::new();
        while self.peek().is_some() {
            interfaces.push(self.class_type()?);
        }
        Ok(ClassSignature {
            type_parameters,
            superclass,
            interfaces,
        })
    }

    fn method_signature(&mut self) -> SignatureResult<MethodSignature> {
        let type_parameters = self.optional_type_parameters()?;
        self.expect(b'(')?;
        let mut parameters = Vec::new();
        loop {
            match self.peek() {
                Some(b')') => break,
                Some(_) => parameters.push(self.any_type(false)?),
                None => return Err(self.error("unterminated parameter list")),
            }
        }
        self.expect(b')')?;
        let return_type = self.any_type(true)?;
        let mut throws = Vec::new();
        while self.peek() == Some(b'^') {
            self.position += 1;
            let thrown = self.any_type(false)?;
            if !matches!(thrown, JavaType::Class(_) | JavaType::TypeVariable(_)) {
                return Err(self.error("thrown type must be a class or a type variable"));
            }
            throws.push(thrown);
        }
        Ok(MethodSignature {
            type_parameters,
            parameters,
            return_type,
            throws,
        })
    }

    fn field_type(&mut self) -> SignatureResult<JavaType> {
        self.any_type(false)
    }

    fn optional_type_parameters(&mut self) -> SignatureResult<Vec<TypeParameter>> {
        if self.peek() != Some(b'<') {
            return Ok(Vec::new());
        }
        self.position += 1;
        let mut parameters = Vec::new();
        loop {
            match self.peek() {
                Some(b'>') if !parameters.is_empty() => break,
                Some(b'>') => return Err(self.error("empty type parameter list")),
                Some(_) => parameters.push(self.type_parameter()?),
                None => return Err(self.error("unterminated type parameter list")),
            }
        }
        self.expect(b'>')?;
        Ok(parameters)
    }

    fn type_parameter(&mut self) -> SignatureResult<TypeParameter> {
        let name = self.identifier(b":")?;
        self.expect(b':')?;
        let class_bound = match self.peek() {
            Some(b':') => None,
            _ => Some(self.reference_type()?),
        };
        let mut interface_bounds = Vec::new();
        while self.peek() == Some(b':') {
            self.position += 1;
            interface_bounds.push(self.reference_type()?);
        }
        Ok(TypeParameter {
            name,
            class_bound,
            interface_bounds,
        })
    }

    fn reference_type(&mut self) -> SignatureResult<JavaType> {
        let start = self.position;
        let parsed = self.any_type(false)?;
        if matches!(parsed, JavaType::Base(_)) {
            self.position = start;
            return Err(self.error("primitive type where a reference type is required"));
        }
        Ok(parsed)
    }

    fn any_type(&mut self, allow_void: bool) -> SignatureResult<JavaType> {
        match self.peek() {
            Some(b'L') => Ok(JavaType::Class(self.class_type()?)),
            Some(b'T') => {
                self.position += 1;
                let name = self.identifier(b";")?;
                self.expect(b';')?;
                Ok(JavaType::TypeVariable(name))
            }
            Some(b'[') => {
                let mut dimensions = 0u32;
                while self.peek() == Some(b'[') {
                    self.position += 1;
                    dimensions += 1;
                }
                let element = self.any_type(false)?;
                Ok(JavaType::Array {
                    dimensions,
                    element: Box::new(element),
                })
            }
            Some(b'*' | b'+' | b'-') => Err(self.error("wildcard outside a type argument list")),
            Some(byte) => match BaseType::from_code(byte as char) {
                Some(BaseType::Void) if !allow_void => {
                    Err(self.error("void is only legal as a method return type"))
                }
                Some(base) => {
                    self.position += 1;
                    Ok(JavaType::Base(base))
                }
                None => Err(self.error(format!("unexpected character '{}'", byte as char))),
            },
            None => Err(self.error("truncated signature")),
        }
    }

    fn class_type(&mut self) -> SignatureResult<ClassTypeSignature> {
        self.expect(b'L')?;
        let mut segments = Vec::new();
        loop {
            let name = self.identifier(b"<.;")?;
            let arguments = if self.peek() == Some(b'<') {
                self.type_arguments()?
            } else {
                Vec::new()
            };
            segments.push(ClassSegment { name, arguments });
            match self.bump() {
                Some(b';') => break,
                Some(b'.') => continue,
                Some(byte) => {
                    self.position -= 1;
                    return Err(self.error(format!(
                        "expected ';' or '.' after class name but found '{}'",
                        byte as char
                    )));
                }
                None => return Err(self.error("unterminated class type")),
            }
        }
        Ok(ClassTypeSignature { segments })
    }

    fn type_arguments(&mut self) -> SignatureResult<Vec<JavaType>> {
        self.expect(b'<')?;
        let mut arguments = Vec::new();
        loop {
            let argument = match self.peek() {
                Some(b'>') if !arguments.is_empty() => break,
                Some(b'>') => return Err(self.error("empty type argument list")),
                Some(b'*') => {
                    self.position += 1;
                    JavaType::Wildcard(Wildcard::Unbounded)
                }
                Some(b'+') => {
                    self.position += 1;
                    JavaType::Wildcard(Wildcard::Extends(Box::new(self.reference_type()?)))
                }
                Some(b'-') => {
                    self.position += 1;
                    JavaType::Wildcard(Wildcard::Super(Box::new(self.reference_type()?)))
                }
                Some(_) => self.reference_type()?,
                None => return Err(self.error("unterminated type argument list")),
            };
            arguments.push(argument);
        }
        self.expect(b'>')?;
        Ok(arguments)
    }
}

impl ClassTypeSignature {
    /// Erased binary name, inner classes joined with `$`.
    pub(crate) fn binary_name(&self) -> String {
        self.segments
            .iter()
            .map(|segment| segment.name.as_str())
            .collect::<Vec<_>>()
            .join("$")
    }

    pub(crate) fn is_parameterized(&self) -> bool {
        self.segments.iter().any(|segment| !segment.arguments.is_empty())
    }

    /// Type arguments of the innermost segment.
    pub(crate) fn arguments(&self) -> &[JavaType] {
        self.segments
            .last()
            .map(|segment| segment.arguments.as_slice())
            .unwrap_or(&[])
    }
}

impl JavaType {
    /// Java source rendering, e.g. `java.util.List<? extends java.lang.Number>`.
    pub(crate) fn java_name(&self) -> String {
        match self {
            JavaType::Base(base) => base.java_name().to_string(),
            JavaType::Class(class) => class.java_name(),
            JavaType::Array {
                dimensions,
                element,
            } => format!("{}{}", element.java_name(), "[]".repeat(*dimensions as usize)),
            JavaType::TypeVariable(name) => name.clone(),
            JavaType::Wildcard(Wildcard::Unbounded) => "?".to_string(),
            JavaType::Wildcard(Wildcard::Extends(bound)) => {
                format!("? extends {}", bound.java_name())
            }
            JavaType::Wildcard(Wildcard::Super(bound)) => format!("? super {}", bound.java_name()),
        }
    }
}

impl ClassTypeSignature {
    fn java_name(&self) -> String {
        let mut rendered = String::new();
        for (index, segment) in self.segments.iter().enumerate() {
            if index > 0 {
                rendered.push('.');
            }
            rendered.push_str(&dotted_name(&segment.name));
            if !segment.arguments.is_empty() {
                let arguments: Vec<String> =
                    segment.arguments.iter().map(JavaType::java_name).collect();
                rendered.push('<');
                rendered.push_str(&arguments.join(","));
                rendered.push('>');
            }
        }
        rendered
    }
}

fn write_arguments(f: &mut fmt::Formatter<'_>, arguments: &[JavaType]) -> fmt::Result {
    if arguments.is_empty() {
        return Ok(());
    }
    f.write_str("<")?;
    for argument in arguments {
        write!(f, "{argument}")?;
    }
    f.write_str(">")
}

fn write_type_parameters(f: &mut fmt::Formatter<'_>, parameters: &[TypeParameter]) -> fmt::Result {
    if parameters.is_empty() {
        return Ok(());
    }
    f.write_str("<")?;
    for parameter in parameters {
        write!(f, "{parameter}")?;
    }
    f.write_str(">")
}

impl fmt::Display for JavaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JavaType::Base(base) => write!(f, "{}", base.code()),
            JavaType::Class(class) => write!(f, "{class}"),
            JavaType::Array {
                dimensions,
                element,
            } => write!(f, "{}{element}", "[".repeat(*dimensions as usize)),
            JavaType::TypeVariable(name) => write!(f, "T{name};"),
            JavaType::Wildcard(Wildcard::Unbounded) => f.write_str("*"),
            JavaType::Wildcard(Wildcard::Extends(bound)) => write!(f, "+{bound}"),
            JavaType::Wildcard(Wildcard::Super(bound)) => write!(f, "-{bound}"),
        }
    }
}

impl fmt::Display for ClassTypeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("L")?;
        for (index, segment) in self.segments.iter().enumerate() {
            if index > 0 {
                f.write_str(".")?;
            }
            f.write_str(&segment.name)?;
            write_arguments(f, &segment.arguments)?;
        }
        f.write_str(";")
    }
}

impl fmt::Display for TypeParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.name)?;
        if let Some(bound) = &self.class_bound {
            write!(f, "{bound}")?;
        }
        for bound in &self.interface_bounds {
            write!(f, ":{bound}")?;
        }
        Ok(())
    }
}

impl fmt::Display for ClassSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_type_parameters(f, &self.type_parameters)?;
        write!(f, "{}", self.superclass)?;
        for interface in &self.interfaces {
            write!(f, "{interface}")?;
        }
        Ok(())
    }
}

impl fmt::Display for MethodSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_type_parameters(f, &self.type_parameters)?;
        f.write_str("(")?;
        for parameter in &self.parameters {
            write!(f, "{parameter}")?;
        }
        write!(f, "){}", self.return_type)?;
        for thrown in &self.throws {
            write!(f, "^{thrown}")?;
        }
        Ok(())
    }
}

impl fmt::Display for ParsedSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParsedSignature::Class(signature) => write!(f, "{signature}"),
            ParsedSignature::Method(signature) => write!(f, "{signature}"),
            ParsedSignature::Field(signature) => write!(f, "{signature}"),
        }
    }
}
