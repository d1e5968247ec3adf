use std::str::FromStr;

use anyhow::{Context, Result};
use jdescriptor::{MethodDescriptor, TypeDescriptor};

use crate::signature::{JavaType, MethodSignature};
use crate::types::OBJECT_CLASS;

/// Erased shape of one descriptor type.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum ErasedShape {
    Void,
    Primitive { wide: bool },
    Class(String),
    Array { dimensions: u32, element: Box<ErasedShape> },
}

impl ErasedShape {
    fn is_reference(&self) -> bool {
        matches!(self, ErasedShape::Class(_) | ErasedShape::Array { .. })
    }

    fn slot_size(&self) -> usize {
        match self {
            ErasedShape::Void => 0,
            ErasedShape::Primitive { wide: true } => 2,
            _ => 1,
        }
    }
}

/// Decode a JVM method descriptor into parameter and return shapes.
pub(crate) fn method_shapes(descriptor: &str) -> Result<(Vec<ErasedShape>, ErasedShape)> {
    let descriptor =
        MethodDescriptor::from_str(descriptor).context("parse method descriptor")?;
    let parameters = descriptor
        .parameter_types()
        .iter()
        .map(descriptor_shape)
        .collect();
    Ok((parameters, descriptor_shape(descriptor.return_type())))
}

/// Count local-variable slots taken by the parameters of a JVM method descriptor.
pub(crate) fn method_parameter_slots(descriptor: &str) -> Result<usize> {
    let (parameters, _) = method_shapes(descriptor)?;
    Ok(parameters.iter().map(ErasedShape::slot_size).sum())
}

/// Entry local slot of each parameter, paired with whether the parameter is a reference.
pub(crate) fn parameter_locals(descriptor: &str, is_static: bool) -> Result<Vec<(usize, bool)>> {
    let (parameters, _) = method_shapes(descriptor)?;
    let mut slot = usize::from(!is_static);
    Ok(parameters
        .iter()
        .map(|parameter| {
            let local = (slot, parameter.is_reference());
            slot += parameter.slot_size();
            local
        })
        .collect())
}

pub(crate) fn returns_reference(descriptor: &str) -> Result<bool> {
    let (_, return_shape) = method_shapes(descriptor)?;
    Ok(return_shape.is_reference())
}

/// Operand stack slots taken by a value of the given field descriptor.
pub(crate) fn field_slots(descriptor: &str) -> usize {
    match descriptor.as_bytes().first() {
        Some(b'J' | b'D') => 2,
        _ => 1,
    }
}

pub(crate) fn is_reference_field(descriptor: &str) -> bool {
    matches!(descriptor.as_bytes().first(), Some(b'L' | b'['))
}

fn descriptor_shape(descriptor: &TypeDescriptor) -> ErasedShape {
    match descriptor {
        TypeDescriptor::Void => ErasedShape::Void,
        TypeDescriptor::Long | TypeDescriptor::Double => ErasedShape::Primitive { wide: true },
        TypeDescriptor::Object(class) => ErasedShape::Class(class.replace('.', "/")),
        TypeDescriptor::Array(element, dimensions) => {
            let dimensions = *dimensions as u32;
            match descriptor_shape(element.as_ref()) {
                ErasedShape::Array {
                    dimensions: inner,
                    element,
                } => ErasedShape::Array {
                    dimensions: dimensions + inner,
                    element,
                },
                element => ErasedShape::Array {
                    dimensions,
                    element: Box::new(element),
                },
            }
        }
        _ => ErasedShape::Primitive { wide: false },
    }
}

/// Erased shape of a parsed signature type; type variables and wildcards erase to the root object.
pub(crate) fn erased_shape(java_type: &JavaType) -> ErasedShape {
    match java_type {
        JavaType::Base(base) if base.slot_size() == 0 => ErasedShape::Void,
        JavaType::Base(base) => ErasedShape::Primitive {
            wide: base.slot_size() == 2,
        },
        JavaType::Class(class) => ErasedShape::Class(class.binary_name()),
        JavaType::Array {
            dimensions,
            element,
        } => ErasedShape::Array {
            dimensions: *dimensions,
            element: Box::new(erased_shape(element)),
        },
        JavaType::TypeVariable(_) | JavaType::Wildcard(_) => {
            ErasedShape::Class(OBJECT_CLASS.to_string())
        }
    }
}

/// Whether a generic method signature describes the same parameter layout as its erased descriptor.
///
/// Compilers omit synthetic parameters (outer instances, enum names) from
/// generic signatures, so a mismatch means the generic form cannot be used to
/// locate parameters.
pub(crate) fn signature_agrees_with_descriptor(
    signature: &MethodSignature,
    descriptor: &str,
) -> Result<bool> {
    let (parameters, return_shape) = method_shapes(descriptor)?;
    if parameters.len() != signature.parameters.len() {
        return Ok(false);
    }
    let parameters_agree = parameters
        .iter()
        .zip(&signature.parameters)
        .all(|(erased, generic)| {
            let generic = erased_shape(generic);
            erased.is_reference() == generic.is_reference()
                && erased.slot_size() == generic.slot_size()
        });
    let generic_return = erased_shape(&signature.return_type);
    Ok(parameters_agree
        && return_shape.is_reference() == generic_return.is_reference()
        && return_shape.slot_size() == generic_return.slot_size())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::parse_method_signature;

    #[test]
    fn non_generic_decoding_agrees_with_signature_parser() {
        for descriptor in [
            "()V",
            "(I)J",
            "(Ljava/lang/String;[I[[Ljava/lang/Object;D)Ljava/util/List;",
            "(ZBCSFJ)[Ljava/lang/String;",
        ] {
            let (parameters, return_shape) = method_shapes(descriptor).expect("jdescriptor");
            let parsed = parse_method_signature(descriptor).expect("signature parser");
            let parsed_parameters: Vec<ErasedShape> =
                parsed.parameters.iter().map(erased_shape).collect();
            assert_eq!(parsed_parameters, parameters, "parameters of {descriptor}");
            assert_eq!(erased_shape(&parsed.return_type), return_shape);
            assert_eq!(parsed.to_string(), descriptor);
        }
    }

    #[test]
    fn parameter_slots_count_wide_values() {
        assert_eq!(method_parameter_slots("(JID)V").expect("slots"), 5);
        assert_eq!(method_parameter_slots("()V").expect("slots"), 0);
    }

    #[test]
    fn generic_signature_with_matching_layout_agrees() {
        let signature = parse_method_signature("<T:Ljava/lang/Object;>(TT;J)Ljava/util/List<TT;>;")
            .expect("parse");
        assert!(
            signature_agrees_with_descriptor(&signature, "(Ljava/lang/Object;J)Ljava/util/List;")
                .expect("compare")
        );
    }

    #[test]
    fn synthetic_parameters_break_agreement() {
        let signature = parse_method_signature("(Ljava/util/List<Ljava/lang/String;>;)V")
            .expect("parse");
        assert!(
            !signature_agrees_with_descriptor(
                &signature,
                "(Lcom/example/Outer;Ljava/util/List;)V"
            )
            .expect("compare")
        );
    }

    #[test]
    fn parameter_locals_skip_receiver_and_wide_slots() {
        let locals = parameter_locals("(JLjava/lang/String;[I)V", false).expect("locals");
        assert_eq!(locals, vec![(1, false), (3, true), (4, true)]);
        let locals = parameter_locals("(Ljava/lang/String;)V", true).expect("locals");
        assert_eq!(locals, vec![(0, true)]);
        assert!(returns_reference("()[I").expect("return"));
        assert!(!returns_reference("()V").expect("return"));
    }

    #[test]
    fn field_descriptor_helpers() {
        assert_eq!(field_slots("J"), 2);
        assert_eq!(field_slots("Ljava/lang/String;"), 1);
        assert!(is_reference_field("[I"));
        assert!(!is_reference_field("I"));
    }

    #[test]
    fn invalid_descriptor_is_an_error() {
        assert!(method_shapes("(Q)V").is_err());
    }
}
