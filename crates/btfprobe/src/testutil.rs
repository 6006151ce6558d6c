//! Shared in-memory universe for unit tests, shaped like the slice of kernel
//! BTF the library usually works against: vfs structs reachable from probe
//! arguments, a task_struct with an anonymous-member hop, and an
//! enum-indexed array of pointers.

use crate::btf::{Btf, EnumValue, FuncParam, Linkage, Member, TypeNode};

fn int(name: &str, size: u32, signed: bool) -> TypeNode {
    TypeNode::Int {
        name: name.into(),
        size,
        signed,
        is_char: false,
        is_bool: false,
        nr_bits: (size * 8) as u8,
    }
}

pub(crate) fn test_universe() -> Btf {
    let mut btf = Btf::new();

    let int8 = btf.add(int("int8", 1, true));
    let int16 = btf.add(int("int16", 2, true));
    let int32 = btf.add(int("int", 4, true));

    // an int sharing the struct's name, to exercise candidate selection
    btf.add(int("dentry", 4, false));

    let inode = btf.add(TypeNode::Struct {
        name: "inode".into(),
        size: 648,
        members: vec![
            Member {
                name: "i_mode".into(),
                type_id: int16,
                offset_bits: 0,
                bitfield_size: 0,
            },
            Member {
                name: "i_ino".into(),
                type_id: int32,
                offset_bits: 512,
                bitfield_size: 0,
            },
        ],
    });

    let const_int8 = btf.add(TypeNode::Const { inner: int8 });
    let char_ptr = btf.add(TypeNode::Pointer { target: const_int8 });
    let qstr = btf.add(TypeNode::Struct {
        name: "qstr".into(),
        size: 16,
        members: vec![Member {
            name: "name".into(),
            type_id: char_ptr,
            offset_bits: 64,
            bitfield_size: 0,
        }],
    });

    let qstr_t = btf.add(TypeNode::Typedef {
        name: "qstr_t".into(),
        inner: qstr,
    });
    btf.add(TypeNode::Struct {
        name: "qstr_holder".into(),
        size: 16,
        members: vec![Member {
            name: "named".into(),
            type_id: qstr_t,
            offset_bits: 0,
            bitfield_size: 0,
        }],
    });

    let inode_ptr = btf.add(TypeNode::Pointer { target: inode });
    let dentry = btf.add(TypeNode::Struct {
        name: "dentry".into(),
        size: 192,
        members: vec![
            Member {
                name: "d_name".into(),
                type_id: qstr,
                offset_bits: 256,
                bitfield_size: 0,
            },
            Member {
                name: "d_inode".into(),
                type_id: inode_ptr,
                offset_bits: 384,
                bitfield_size: 0,
            },
        ],
    });

    btf.add(TypeNode::Enum {
        name: "an_enum".into(),
        size: 4,
        signed: false,
        is64: false,
        values: vec![
            EnumValue {
                name: "ENUM_VAL_0".into(),
                value: 0,
            },
            EnumValue {
                name: "ENUM_VAL_1".into(),
                value: 1,
            },
            EnumValue {
                name: "ENUM_VAL_2".into(),
                value: 2,
            },
            EnumValue {
                name: "ENUM_VAL_20".into(),
                value: 20,
            },
        ],
    });

    let cred = btf.add(TypeNode::Struct {
        name: "cred".into(),
        size: 176,
        members: vec![Member {
            name: "uid".into(),
            type_id: int32,
            offset_bits: 32,
            bitfield_size: 0,
        }],
    });
    let const_cred = btf.add(TypeNode::Const { inner: cred });
    let cred_ptr = btf.add(TypeNode::Pointer { target: const_cred });

    let nr_struct = btf.add(TypeNode::Struct {
        name: "nr_struct".into(),
        size: 16,
        members: vec![Member {
            name: "val".into(),
            type_id: int32,
            offset_bits: 32,
            bitfield_size: 0,
        }],
    });
    let nr_ptr = btf.add(TypeNode::Pointer { target: nr_struct });
    let numbers = btf.add(TypeNode::Array {
        elem: nr_ptr,
        index: int32,
        nelems: 4,
    });

    let anon = btf.add(TypeNode::Struct {
        name: String::new(),
        size: 256,
        members: vec![
            Member {
                name: "cred".into(),
                type_id: cred_ptr,
                offset_bits: 16,
                bitfield_size: 0,
            },
            Member {
                name: "numbers".into(),
                type_id: numbers,
                offset_bits: 256,
                bitfield_size: 0,
            },
        ],
    });
    let anon_ptr = btf.add(TypeNode::Pointer { target: anon });

    let task_struct = btf.add(TypeNode::Struct {
        name: "task_struct".into(),
        size: 4160,
        members: vec![
            Member {
                name: String::new(),
                type_id: anon_ptr,
                offset_bits: 32,
                bitfield_size: 0,
            },
            Member {
                name: "pid".into(),
                type_id: int32,
                offset_bits: 12032,
                bitfield_size: 0,
            },
            Member {
                name: "tgid".into(),
                type_id: int32,
                offset_bits: 12064,
                bitfield_size: 0,
            },
        ],
    });

    let dentry_ptr = btf.add(TypeNode::Pointer { target: dentry });
    let task_ptr = btf.add(TypeNode::Pointer { target: task_struct });

    let proto = btf.add(TypeNode::FuncProto {
        ret: int16,
        params: vec![
            FuncParam {
                name: "dentry_param".into(),
                type_id: dentry_ptr,
            },
            FuncParam {
                name: "inode_param".into(),
                type_id: inode_ptr,
            },
        ],
    });
    btf.add(TypeNode::Func {
        name: "test_function".into(),
        linkage: Linkage::Static,
        proto,
    });

    let ret_proto = btf.add(TypeNode::FuncProto {
        ret: dentry_ptr,
        params: vec![
            FuncParam {
                name: "dentry_param".into(),
                type_id: dentry_ptr,
            },
            FuncParam {
                name: "inode_param".into(),
                type_id: inode_ptr,
            },
            FuncParam {
                name: "tsk_param".into(),
                type_id: task_ptr,
            },
        ],
    });
    btf.add(TypeNode::Func {
        name: "test_function_with_ret".into(),
        linkage: Linkage::Static,
        proto: ret_proto,
    });

    btf
}
