//! In-code fixtures: a minimal arm64 shared object and a minimal binary
//! manifest, just rich enough for the parsers to accept.

use byteorder::{LittleEndian, WriteBytesExt};

use crate::manifest::axml::{
    AxmlDocument, XmlAttribute, XmlElement, TYPE_INT_BOOLEAN, TYPE_INT_DEC, TYPE_STRING,
};
use crate::manifest::ANDROID_NAMESPACE;

/// Builds a little-endian ELF64 shared object for aarch64 with the given
/// DT_NEEDED list, one PT_LOAD, a PT_DYNAMIC, and section headers for
/// `.dynstr`/`.dynamic`/`.shstrtab`.
pub(crate) fn build_so(needed: &[&str]) -> Vec<u8> {
    // .dynstr: leading NUL, then each name NUL-terminated
    let mut dynstr: Vec<u8> = vec![0];
    let mut name_offsets = Vec::with_capacity(needed.len());
    for name in needed {
        name_offsets.push(dynstr.len() as u64);
        dynstr.extend_from_slice(name.as_bytes());
        dynstr.push(0);
    }

    let ehdr_len = 64usize;
    let phdr_len = 56usize;
    let dynstr_off = ehdr_len + 2 * phdr_len;
    let dynamic_off = align8(dynstr_off + dynstr.len());
    let dynamic_len = (needed.len() + 3) * 16;
    let load_end = dynamic_off + dynamic_len;

    let shstrtab = b"\0.dynstr\0.dynamic\0.shstrtab\0";
    let shstrtab_off = load_end;
    let shoff = align8(shstrtab_off + shstrtab.len());

    let mut out: Vec<u8> = Vec::new();

    // ELF header
    out.extend_from_slice(&[0x7f, b'E', b'L', b'F', 2, 1, 1, 0]);
    out.extend_from_slice(&[0u8; 8]);
    out.write_u16::<LittleEndian>(3).unwrap(); // ET_DYN
    out.write_u16::<LittleEndian>(183).unwrap(); // EM_AARCH64
    out.write_u32::<LittleEndian>(1).unwrap();
    out.write_u64::<LittleEndian>(0).unwrap(); // e_entry
    out.write_u64::<LittleEndian>(ehdr_len as u64).unwrap(); // e_phoff
    out.write_u64::<LittleEndian>(shoff as u64).unwrap(); // e_shoff
    out.write_u32::<LittleEndian>(0).unwrap(); // e_flags
    out.write_u16::<LittleEndian>(ehdr_len as u16).unwrap();
    out.write_u16::<LittleEndian>(phdr_len as u16).unwrap();
    out.write_u16::<LittleEndian>(2).unwrap(); // e_phnum
    out.write_u16::<LittleEndian>(64).unwrap(); // e_shentsize
    out.write_u16::<LittleEndian>(4).unwrap(); // e_shnum
    out.write_u16::<LittleEndian>(3).unwrap(); // e_shstrndx

    // PT_LOAD mapping the file head identity-style
    write_phdr(&mut out, 1, 5, 0, 0, load_end as u64, 0x1000);
    // PT_DYNAMIC
    write_phdr(
        &mut out,
        2,
        6,
        dynamic_off as u64,
        dynamic_off as u64,
        dynamic_len as u64,
        8,
    );

    out.extend_from_slice(&dynstr);
    while out.len() < dynamic_off {
        out.push(0);
    }

    for offset in &name_offsets {
        write_dyn(&mut out, 1, *offset); // DT_NEEDED
    }
    write_dyn(&mut out, 5, dynstr_off as u64); // DT_STRTAB
    write_dyn(&mut out, 10, dynstr.len() as u64); // DT_STRSZ
    write_dyn(&mut out, 0, 0); // DT_NULL

    out.extend_from_slice(shstrtab);
    while out.len() < shoff {
        out.push(0);
    }

    // NULL, .dynstr, .dynamic, .shstrtab
    write_shdr(&mut out, 0, 0, 0, 0, 0, 0, 0, 0, 0);
    write_shdr(
        &mut out,
        1,
        3,
        2,
        dynstr_off as u64,
        dynstr_off as u64,
        dynstr.len() as u64,
        0,
        1,
        0,
    );
    write_shdr(
        &mut out,
        9,
        6,
        3,
        dynamic_off as u64,
        dynamic_off as u64,
        dynamic_len as u64,
        1,
        8,
        16,
    );
    write_shdr(
        &mut out,
        18,
        3,
        0,
        0,
        shstrtab_off as u64,
        shstrtab.len() as u64,
        0,
        1,
        0,
    );

    out
}

fn align8(value: usize) -> usize {
    (value + 7) & !7
}

fn write_phdr(out: &mut Vec<u8>, p_type: u32, flags: u32, offset: u64, vaddr: u64, size: u64, align: u64) {
    out.write_u32::<LittleEndian>(p_type).unwrap();
    out.write_u32::<LittleEndian>(flags).unwrap();
    out.write_u64::<LittleEndian>(offset).unwrap();
    out.write_u64::<LittleEndian>(vaddr).unwrap();
    out.write_u64::<LittleEndian>(vaddr).unwrap();
    out.write_u64::<LittleEndian>(size).unwrap();
    out.write_u64::<LittleEndian>(size).unwrap();
    out.write_u64::<LittleEndian>(align).unwrap();
}

fn write_dyn(out: &mut Vec<u8>, tag: u64, value: u64) {
    out.write_u64::<LittleEndian>(tag).unwrap();
    out.write_u64::<LittleEndian>(value).unwrap();
}

#[allow(clippy::too_many_arguments)]
fn write_shdr(
    out: &mut Vec<u8>,
    name: u32,
    sh_type: u32,
    flags: u64,
    addr: u64,
    offset: u64,
    size: u64,
    link: u32,
    align: u64,
    entsize: u64,
) {
    out.write_u32::<LittleEndian>(name).unwrap();
    out.write_u32::<LittleEndian>(sh_type).unwrap();
    out.write_u64::<LittleEndian>(flags).unwrap();
    out.write_u64::<LittleEndian>(addr).unwrap();
    out.write_u64::<LittleEndian>(offset).unwrap();
    out.write_u64::<LittleEndian>(size).unwrap();
    out.write_u32::<LittleEndian>(link).unwrap();
    out.write_u32::<LittleEndian>(0).unwrap(); // sh_info
    out.write_u64::<LittleEndian>(align).unwrap();
    out.write_u64::<LittleEndian>(entsize).unwrap();
}

/// Minimal binary manifest: a `manifest` root with a package attribute and
/// one `application` child. `extract` controls whether the application
/// element carries `android:extractNativeLibs` and with which value.
pub(crate) fn minimal_manifest(extract: Option<bool>) -> Vec<u8> {
    let mut resource_names = vec!["versionCode".to_string()];
    let mut resource_ids = vec![0x0101021b];

    let mut app_attrs = Vec::new();
    if let Some(value) = extract {
        resource_names.push("extractNativeLibs".to_string());
        resource_ids.push(0x010104ea);
        app_attrs.push(XmlAttribute {
            namespace_uri: Some(ANDROID_NAMESPACE.to_string()),
            name: "extractNativeLibs".to_string(),
            resource_name: true,
            value_type: TYPE_INT_BOOLEAN,
            string_value: None,
            data: if value { 0xFFFFFFFF } else { 0 },
        });
    }

    document(
        resource_names,
        resource_ids,
        vec![XmlElement {
            tag_name: "application".to_string(),
            attrs: app_attrs,
            children: Vec::new(),
        }],
    )
    .to_data()
}

pub(crate) fn manifest_without_application() -> Vec<u8> {
    document(
        vec!["versionCode".to_string()],
        vec![0x0101021b],
        Vec::new(),
    )
    .to_data()
}

fn document(
    resource_names: Vec<String>,
    resource_ids: Vec<u32>,
    children: Vec<XmlElement>,
) -> AxmlDocument {
    AxmlDocument {
        namespace_prefix: "android".to_string(),
        namespace_uri: ANDROID_NAMESPACE.to_string(),
        resource_ids,
        resource_names,
        root: XmlElement {
            tag_name: "manifest".to_string(),
            attrs: vec![
                XmlAttribute {
                    namespace_uri: Some(ANDROID_NAMESPACE.to_string()),
                    name: "versionCode".to_string(),
                    resource_name: true,
                    value_type: TYPE_INT_DEC,
                    string_value: None,
                    data: 1,
                },
                XmlAttribute {
                    namespace_uri: None,
                    name: "package".to_string(),
                    resource_name: false,
                    value_type: TYPE_STRING,
                    string_value: Some("com.example.app".to_string()),
                    data: 0,
                },
            ],
            children,
        },
    }
}
