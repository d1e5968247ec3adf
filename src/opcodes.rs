//! JVM opcodes interpreted by the null-definiteness analysis.

pub(crate) const ACONST_NULL: u8 = 0x01;
pub(crate) const LDC: u8 = 0x12;
pub(crate) const LDC_W: u8 = 0x13;
pub(crate) const IALOAD: u8 = 0x2e;
pub(crate) const SALOAD: u8 = 0x35;
pub(crate) const IASTORE: u8 = 0x4f;
pub(crate) const LASTORE: u8 = 0x50;
pub(crate) const DASTORE: u8 = 0x52;
pub(crate) const SASTORE: u8 = 0x56;
pub(crate) const IF_ACMPEQ: u8 = 0xa5;
pub(crate) const IF_ACMPNE: u8 = 0xa6;
pub(crate) const ARETURN: u8 = 0xb0;
pub(crate) const GETFIELD: u8 = 0xb4;
pub(crate) const PUTSTATIC: u8 = 0xb3;
pub(crate) const PUTFIELD: u8 = 0xb5;
pub(crate) const INVOKEVIRTUAL: u8 = 0xb6;
pub(crate) const INVOKESPECIAL: u8 = 0xb7;
pub(crate) const INVOKESTATIC: u8 = 0xb8;
pub(crate) const INVOKEINTERFACE: u8 = 0xb9;
pub(crate) const NEW: u8 = 0xbb;
pub(crate) const NEWARRAY: u8 = 0xbc;
pub(crate) const ANEWARRAY: u8 = 0xbd;
pub(crate) const ARRAYLENGTH: u8 = 0xbe;
pub(crate) const ATHROW: u8 = 0xbf;
pub(crate) const MONITORENTER: u8 = 0xc2;
pub(crate) const MULTIANEWARRAY: u8 = 0xc5;
pub(crate) const IFNULL: u8 = 0xc6;
pub(crate) const IFNONNULL: u8 = 0xc7;

/// Array element loads `iaload` through `saload`; the array reference sits below the index.
pub(crate) fn is_array_load(opcode: u8) -> bool {
    (IALOAD..=SALOAD).contains(&opcode)
}

/// Array element stores `iastore` through `sastore`.
pub(crate) fn is_array_store(opcode: u8) -> bool {
    (IASTORE..=SASTORE).contains(&opcode)
}

/// Stack slots taken by the value an array store writes.
pub(crate) fn array_store_value_slots(opcode: u8) -> usize {
    match opcode {
        LASTORE | DASTORE => 2,
        _ => 1,
    }
}

pub(crate) fn is_invoke(opcode: u8) -> bool {
    matches!(
        opcode,
        INVOKEVIRTUAL | INVOKESPECIAL | INVOKESTATIC | INVOKEINTERFACE
    )
}
