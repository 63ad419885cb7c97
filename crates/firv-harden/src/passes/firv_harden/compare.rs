// Structural equality over the effective return type. Both sides arrive as
// pointers to slots of the compared type; aggregates are walked with geps
// and only scalar leaves are loaded.

use firv_core::ir::{Builder, Ty, Value};
use firv_core::Result;

use crate::error::pass_error;

/// Single eligibility predicate shared by the top-level gate and the
/// comparator, so every type the gate accepts has a comparison the emitter
/// can synthesize.
pub fn is_hardenable_type(ty: &Ty) -> bool {
    match ty {
        _ if ty.is_integer() || ty.is_float() => true,
        Ty::Struct { fields, .. } => fields.iter().all(is_hardenable_type),
        Ty::Array(element, _) => is_hardenable_type(element),
        _ => false,
    }
}

/// Emit IR computing a single boolean: true iff the values behind `slot1`
/// and `slot2` are exactly equal. For floats this is ordered equality, so
/// two NaN results compare unequal.
pub fn emit_slot_compare(
    b: &mut Builder<'_>,
    ty: &Ty,
    slot1: Value,
    slot2: Value,
) -> Result<Value> {
    if ty.is_integer() {
        let v1 = b.volatile_load(ty.clone(), slot1, "ai1")?;
        let v2 = b.volatile_load(ty.clone(), slot2, "ai2")?;
        return b.icmp_eq(v1, v2, "cmpInt");
    }
    if ty.is_float() {
        let v1 = b.volatile_load(ty.clone(), slot1, "ai1")?;
        let v2 = b.volatile_load(ty.clone(), slot2, "ai2")?;
        return b.fcmp_oeq(v1, v2, "cmpFloat");
    }
    match ty {
        Ty::Struct { .. } => compare_struct_fields(b, ty, slot1, slot2),
        Ty::Array(..) => compare_array_elements(b, ty, slot1, slot2),
        other => Err(pass_error(format!(
            "cannot create comparison for the {} type",
            other
        ))),
    }
}

fn compare_struct_fields(
    b: &mut Builder<'_>,
    struct_ty: &Ty,
    p1: Value,
    p2: Value,
) -> Result<Value> {
    let Ty::Struct { fields, .. } = struct_ty else {
        return Err(pass_error(format!(
            "field comparison on non-struct type {}",
            struct_ty
        )));
    };

    let mut all_fields_equal = Value::const_bool(true);
    for (i, field_ty) in fields.iter().enumerate() {
        let field_p1 = b.gep(
            struct_ty.clone(),
            p1.clone(),
            vec![Value::const_i32(0), Value::const_i32(i as i32)],
            &format!("fieldPtr{}", i),
        )?;
        let field_p2 = b.gep(
            struct_ty.clone(),
            p2.clone(),
            vec![Value::const_i32(0), Value::const_i32(i as i32)],
            &format!("fieldPtr{}", i),
        )?;
        let field_equal =
            compare_element(b, field_ty, field_p1, field_p2, "field", "cmpField", i)?;
        all_fields_equal = b.and(all_fields_equal, field_equal, &format!("andTmp{}", i))?;
    }

    Ok(all_fields_equal)
}

fn compare_array_elements(
    b: &mut Builder<'_>,
    array_ty: &Ty,
    p1: Value,
    p2: Value,
) -> Result<Value> {
    let Ty::Array(element_ty, len) = array_ty else {
        return Err(pass_error(format!(
            "element comparison on non-array type {}",
            array_ty
        )));
    };

    let mut all_elements_equal = Value::const_bool(true);
    for i in 0..*len {
        let element_p1 = b.gep(
            array_ty.clone(),
            p1.clone(),
            vec![Value::const_i32(0), Value::const_i32(i as i32)],
            &format!("elementPtr{}", i),
        )?;
        let element_p2 = b.gep(
            array_ty.clone(),
            p2.clone(),
            vec![Value::const_i32(0), Value::const_i32(i as i32)],
            &format!("elementPtr{}", i),
        )?;
        let element_equal = compare_element(
            b,
            element_ty,
            element_p1,
            element_p2,
            "element",
            "cmpElement",
            i as usize,
        )?;
        all_elements_equal =
            b.and(all_elements_equal, element_equal, &format!("andTmp{}", i))?;
    }

    Ok(all_elements_equal)
}

fn compare_element(
    b: &mut Builder<'_>,
    ty: &Ty,
    p1: Value,
    p2: Value,
    leaf_label: &str,
    cmp_label: &str,
    index: usize,
) -> Result<Value> {
    if ty.is_integer() {
        let v1 = b.load(ty.clone(), p1, &format!("{}{}", leaf_label, index))?;
        let v2 = b.load(ty.clone(), p2, &format!("{}{}", leaf_label, index))?;
        return b.icmp_eq(v1, v2, &format!("{}{}", cmp_label, index));
    }
    if ty.is_float() {
        let v1 = b.load(ty.clone(), p1, &format!("{}{}", leaf_label, index))?;
        let v2 = b.load(ty.clone(), p2, &format!("{}{}", leaf_label, index))?;
        return b.fcmp_oeq(v1, v2, ".cmpFloatLike");
    }
    match ty {
        Ty::Struct { .. } => compare_struct_fields(b, ty, p1, p2),
        Ty::Array(..) => compare_array_elements(b, ty, p1, p2),
        other => Err(pass_error(format!(
            "cannot create comparison for the {} type",
            other
        ))),
    }
}
