use std::collections::HashMap;

use crate::manifest::ManifestError;
use crate::utils::{get_leu16_value, get_leu32_value, push_leu32};

const AXML_MAGIC: u32 = 0x00080003;
const CHUNK_STRING_POOL: u32 = 0x001C0001;
const CHUNK_RESOURCE_MAP: u32 = 0x00080180;
const CHUNK_START_NAMESPACE: u32 = 0x00100100;
const CHUNK_END_NAMESPACE: u32 = 0x00100101;
const CHUNK_START_ELEMENT: u32 = 0x00100102;
const CHUNK_END_ELEMENT: u32 = 0x00100103;

const UTF8_POOL_FLAG: u32 = 1 << 8;
const NO_ENTRY: u32 = 0xFFFFFFFF;

pub const TYPE_STRING: u32 = 0x03000008;
pub const TYPE_INT_DEC: u32 = 0x10000008;
pub const TYPE_INT_BOOLEAN: u32 = 0x12000008;

pub struct XmlAttribute {
    pub namespace_uri: Option<String>,
    pub name: String,
    // attribute names below the resource map length carry a resource id
    pub(crate) resource_name: bool,
    pub value_type: u32,
    pub string_value: Option<String>,
    pub data: u32,
}

pub struct XmlElement {
    pub tag_name: String,
    pub attrs: Vec<XmlAttribute>,
    pub children: Vec<XmlElement>,
}

pub struct AxmlDocument {
    pub(crate) namespace_prefix: String,
    pub(crate) namespace_uri: String,
    pub(crate) resource_ids: Vec<u32>,
    pub(crate) resource_names: Vec<String>,
    pub root: XmlElement,
}

fn u32_at(data: &[u8], offset: usize) -> Result<u32, ManifestError> {
    if offset + 4 > data.len() {
        return Err(ManifestError::Format(offset));
    }
    Ok(get_leu32_value(data, offset))
}

fn u16_at(data: &[u8], offset: usize) -> Result<u16, ManifestError> {
    if offset + 2 > data.len() {
        return Err(ManifestError::Format(offset));
    }
    Ok(get_leu16_value(data, offset))
}

struct StringPool {
    strings: Vec<String>,
}

impl StringPool {
    fn parse(data: &[u8], offset: &mut usize) -> Result<StringPool, ManifestError> {
        let chunk_offset = *offset;
        if u32_at(data, chunk_offset)? != CHUNK_STRING_POOL {
            return Err(ManifestError::Format(chunk_offset));
        }
        let chunk_size = u32_at(data, chunk_offset + 4)? as usize;
        let string_count = u32_at(data, chunk_offset + 8)?;
        let flags = u32_at(data, chunk_offset + 16)?;
        let pool_offset = u32_at(data, chunk_offset + 20)? as usize;
        let utf8 = flags & UTF8_POOL_FLAG != 0;
        if 28 + 4 * string_count as usize > chunk_size {
            return Err(ManifestError::Format(chunk_offset + 8));
        }

        let mut strings = Vec::with_capacity(string_count as usize);
        for i in 0..string_count {
            let rel = u32_at(data, chunk_offset + 28 + 4 * i as usize)? as usize;
            let str_offset = chunk_offset + pool_offset + rel;
            let value = if utf8 {
                StringPool::read_utf8(data, str_offset)?
            } else {
                StringPool::read_utf16(data, str_offset)?
            };
            strings.push(value);
        }

        *offset = chunk_offset + chunk_size;
        Ok(StringPool { strings })
    }

    fn read_utf16(data: &[u8], offset: usize) -> Result<String, ManifestError> {
        let mut cursor = offset;
        let mut len = u16_at(data, cursor)? as usize;
        cursor += 2;
        if len & 0x8000 != 0 {
            len = ((len & 0x7fff) << 16) | u16_at(data, cursor)? as usize;
            cursor += 2;
        }
        let mut units = Vec::with_capacity(len);
        for _ in 0..len {
            units.push(u16_at(data, cursor)?);
            cursor += 2;
        }
        String::from_utf16(&units).map_err(|_| ManifestError::Format(offset))
    }

    fn read_utf8(data: &[u8], offset: usize) -> Result<String, ManifestError> {
        let mut cursor = offset;
        // two lengths: utf-16 unit count first, then the byte count we need
        let (_, consumed) = StringPool::read_utf8_len(data, cursor)?;
        cursor += consumed;
        let (byte_len, consumed) = StringPool::read_utf8_len(data, cursor)?;
        cursor += consumed;
        if cursor + byte_len > data.len() {
            return Err(ManifestError::Format(offset));
        }
        std::str::from_utf8(&data[cursor..cursor + byte_len])
            .map(str::to_string)
            .map_err(|_| ManifestError::Format(offset))
    }

    fn read_utf8_len(data: &[u8], offset: usize) -> Result<(usize, usize), ManifestError> {
        let first = *data.get(offset).ok_or(ManifestError::Format(offset))? as usize;
        if first & 0x80 != 0 {
            let second = *data.get(offset + 1).ok_or(ManifestError::Format(offset))? as usize;
            Ok((((first & 0x7f) << 8) | second, 2))
        } else {
            Ok((first, 1))
        }
    }

    fn get(&self, index: u32) -> Result<&str, ManifestError> {
        self.strings
            .get(index as usize)
            .map(String::as_str)
            .ok_or(ManifestError::Format(index as usize))
    }
}

pub(crate) struct StringPoolBuilder {
    strings: Vec<String>,
    index: HashMap<String, u32>,
    resource_len: usize,
}

impl StringPoolBuilder {
    // resource-mapped names keep their seeded order so the map stays
    // index-aligned with the resource chunk
    pub(crate) fn new(resource_names: &[String]) -> StringPoolBuilder {
        let mut builder = StringPoolBuilder {
            strings: Vec::new(),
            index: HashMap::new(),
            resource_len: resource_names.len(),
        };
        for name in resource_names {
            let position = builder.strings.len() as u32;
            builder.strings.push(name.clone());
            builder.index.entry(name.clone()).or_insert(position);
        }
        builder
    }

    pub(crate) fn resource_index(&self, name: &str) -> Option<u32> {
        self.index
            .get(name)
            .copied()
            .filter(|&i| (i as usize) < self.resource_len)
    }

    pub(crate) fn put(&mut self, value: &str) -> u32 {
        if let Some(&existing) = self.index.get(value) {
            return existing;
        }
        let position = self.strings.len() as u32;
        self.strings.push(value.to_string());
        self.index.insert(value.to_string(), position);
        position
    }

    pub(crate) fn build(&self) -> Vec<u8> {
        let mut chunk: Vec<u8> = Vec::new();
        push_leu32(&mut chunk, CHUNK_STRING_POOL);
        push_leu32(&mut chunk, 0); // size, patched below
        push_leu32(&mut chunk, self.strings.len() as u32);
        push_leu32(&mut chunk, 0); // style count
        push_leu32(&mut chunk, 0); // flags: utf-16
        push_leu32(&mut chunk, (7 * 4 + self.strings.len() * 4) as u32);
        push_leu32(&mut chunk, 0); // style pool offset

        let mut string_offset: u32 = 0;
        for item in &self.strings {
            push_leu32(&mut chunk, string_offset);
            let units = item.encode_utf16().count() as u32;
            string_offset += 2 + units * 2 + 2;
        }
        for item in &self.strings {
            let units: Vec<u16> = item.encode_utf16().collect();
            chunk.push((units.len() & 0xff) as u8);
            chunk.push(((units.len() >> 8) & 0xff) as u8);
            for unit in units {
                chunk.push((unit & 0xff) as u8);
                chunk.push(((unit >> 8) & 0xff) as u8);
            }
            chunk.push(0);
            chunk.push(0);
        }
        while chunk.len() % 4 != 0 {
            chunk.push(0);
        }

        let chunk_len = chunk.len() as u32;
        chunk[4..8].copy_from_slice(&chunk_len.to_le_bytes());
        chunk
    }
}

impl XmlElement {
    fn parse(
        data: &[u8],
        pool: &StringPool,
        resource_count: usize,
        offset: &mut usize,
    ) -> Result<XmlElement, ManifestError> {
        let start = *offset;
        if u32_at(data, start)? != CHUNK_START_ELEMENT {
            return Err(ManifestError::Format(start));
        }
        let chunk_size = u32_at(data, start + 4)? as usize;
        if chunk_size < 9 * 4 {
            return Err(ManifestError::Format(start + 4));
        }
        let name_index = u32_at(data, start + 5 * 4)?;
        let attr_layout = u32_at(data, start + 6 * 4)?;
        let attr_start = (attr_layout & 0xffff) as usize;
        let attr_record = (attr_layout >> 16) as usize;
        let attr_count = (u32_at(data, start + 7 * 4)? & 0xffff) as usize;

        let tag_name = pool.get(name_index)?.to_string();
        let mut element = XmlElement {
            tag_name: tag_name.clone(),
            attrs: Vec::with_capacity(attr_count),
            children: Vec::new(),
        };

        for i in 0..attr_count {
            let a = start + 16 + attr_start + i * attr_record;
            let namespace_index = u32_at(data, a)?;
            let attr_name_index = u32_at(data, a + 4)?;
            let raw_index = u32_at(data, a + 2 * 4)?;
            let value_type = u32_at(data, a + 3 * 4)?;
            let value_data = u32_at(data, a + 4 * 4)?;

            let mut string_value = if raw_index == NO_ENTRY {
                None
            } else {
                Some(pool.get(raw_index)?.to_string())
            };
            // string-typed values index the pool through the data word too
            if value_type == TYPE_STRING && string_value.is_none() {
                string_value = Some(pool.get(value_data)?.to_string());
            }

            element.attrs.push(XmlAttribute {
                namespace_uri: if namespace_index == NO_ENTRY {
                    None
                } else {
                    Some(pool.get(namespace_index)?.to_string())
                },
                name: pool.get(attr_name_index)?.to_string(),
                resource_name: (attr_name_index as usize) < resource_count,
                value_type,
                string_value,
                data: value_data,
            });
        }

        *offset = start + chunk_size;

        while *offset < data.len() {
            let chunk_type = u32_at(data, *offset)?;
            if chunk_type == CHUNK_START_ELEMENT {
                element
                    .children
                    .push(XmlElement::parse(data, pool, resource_count, offset)?);
            } else if chunk_type == CHUNK_END_ELEMENT {
                let end_size = u32_at(data, *offset + 4)? as usize;
                if end_size < 6 * 4 {
                    return Err(ManifestError::Format(*offset + 4));
                }
                let end_name = pool.get(u32_at(data, *offset + 5 * 4)?)?;
                let matched = end_name == tag_name;
                *offset += end_size;
                if matched {
                    return Ok(element);
                }
            } else {
                return Err(ManifestError::Format(*offset));
            }
        }

        Err(ManifestError::Format(*offset))
    }

    fn write(&self, out: &mut Vec<u8>, builder: &mut StringPoolBuilder) {
        push_leu32(out, CHUNK_START_ELEMENT);
        push_leu32(out, (9 * 4 + self.attrs.len() * 5 * 4) as u32);
        push_leu32(out, 1); // line number
        push_leu32(out, NO_ENTRY); // comment
        push_leu32(out, NO_ENTRY); // namespace
        push_leu32(out, builder.put(&self.tag_name));
        push_leu32(out, 0x00140014); // attribute start / record size
        push_leu32(out, self.attrs.len() as u32);
        push_leu32(out, 0); // id/class/style indices unused

        for attr in &self.attrs {
            push_leu32(
                out,
                match &attr.namespace_uri {
                    Some(uri) => builder.put(uri),
                    None => NO_ENTRY,
                },
            );
            let name_index = if attr.resource_name {
                builder.resource_index(&attr.name)
            } else {
                None
            };
            push_leu32(out, name_index.unwrap_or_else(|| builder.put(&attr.name)));
            let raw_index = match &attr.string_value {
                Some(value) => builder.put(value),
                None => NO_ENTRY,
            };
            push_leu32(out, raw_index);
            push_leu32(out, attr.value_type);
            if attr.value_type == TYPE_STRING && raw_index != NO_ENTRY {
                push_leu32(out, raw_index);
            } else {
                push_leu32(out, attr.data);
            }
        }

        for child in &self.children {
            child.write(out, builder);
        }

        push_leu32(out, CHUNK_END_ELEMENT);
        push_leu32(out, 6 * 4);
        push_leu32(out, 1); // line number
        push_leu32(out, NO_ENTRY); // comment
        push_leu32(out, NO_ENTRY); // namespace
        push_leu32(out, builder.put(&self.tag_name));
    }
}

impl AxmlDocument {
    pub fn from_data(data: &[u8]) -> Result<AxmlDocument, ManifestError> {
        if u32_at(data, 0)? != AXML_MAGIC {
            return Err(ManifestError::Format(0));
        }
        let file_length = u32_at(data, 4)? as usize;
        if file_length < 8 || file_length > data.len() {
            return Err(ManifestError::Format(4));
        }
        let data = &data[..file_length];
        let mut offset = 8;

        let pool = StringPool::parse(data, &mut offset)?;

        if u32_at(data, offset)? != CHUNK_RESOURCE_MAP {
            return Err(ManifestError::Format(offset));
        }
        let resource_size = u32_at(data, offset + 4)? as usize;
        if resource_size < 8 || resource_size % 4 != 0 {
            return Err(ManifestError::Format(offset + 4));
        }
        let mut resource_ids = Vec::with_capacity(resource_size / 4 - 2);
        for i in 0..(resource_size / 4 - 2) {
            resource_ids.push(u32_at(data, offset + 8 + 4 * i)?);
        }
        offset += resource_size;

        let mut resource_names = Vec::with_capacity(resource_ids.len());
        for i in 0..resource_ids.len() {
            resource_names.push(pool.get(i as u32)?.to_string());
        }

        if u32_at(data, offset)? != CHUNK_START_NAMESPACE {
            return Err(ManifestError::Format(offset));
        }
        let namespace_size = u32_at(data, offset + 4)? as usize;
        let namespace_prefix = pool.get(u32_at(data, offset + 4 * 4)?)?.to_string();
        let namespace_uri = pool.get(u32_at(data, offset + 5 * 4)?)?.to_string();
        offset += namespace_size;

        let root = XmlElement::parse(data, &pool, resource_ids.len(), &mut offset)?;

        if u32_at(data, offset)? != CHUNK_END_NAMESPACE {
            return Err(ManifestError::Format(offset));
        }
        let end_prefix = pool.get(u32_at(data, offset + 4 * 4)?)?;
        let end_uri = pool.get(u32_at(data, offset + 5 * 4)?)?;
        if end_prefix != namespace_prefix || end_uri != namespace_uri {
            return Err(ManifestError::Format(offset));
        }

        Ok(AxmlDocument {
            namespace_prefix,
            namespace_uri,
            resource_ids,
            resource_names,
            root,
        })
    }

    pub fn to_data(&self) -> Vec<u8> {
        let mut builder = StringPoolBuilder::new(&self.resource_names);

        // content first: it feeds the builder every string it references
        let mut content: Vec<u8> = Vec::new();
        push_leu32(&mut content, CHUNK_START_NAMESPACE);
        push_leu32(&mut content, 4 * 6);
        push_leu32(&mut content, 1); // line number
        push_leu32(&mut content, NO_ENTRY); // comment
        push_leu32(&mut content, builder.put(&self.namespace_prefix));
        push_leu32(&mut content, builder.put(&self.namespace_uri));

        self.root.write(&mut content, &mut builder);

        push_leu32(&mut content, CHUNK_END_NAMESPACE);
        push_leu32(&mut content, 4 * 6);
        push_leu32(&mut content, 1);
        push_leu32(&mut content, NO_ENTRY);
        push_leu32(&mut content, builder.put(&self.namespace_prefix));
        push_leu32(&mut content, builder.put(&self.namespace_uri));

        let pool_chunk = builder.build();

        let mut resource_chunk: Vec<u8> = Vec::new();
        push_leu32(&mut resource_chunk, CHUNK_RESOURCE_MAP);
        push_leu32(&mut resource_chunk, (8 + 4 * self.resource_ids.len()) as u32);
        for id in &self.resource_ids {
            push_leu32(&mut resource_chunk, *id);
        }

        let mut out: Vec<u8> = Vec::new();
        push_leu32(&mut out, AXML_MAGIC);
        push_leu32(
            &mut out,
            (8 + pool_chunk.len() + resource_chunk.len() + content.len()) as u32,
        );
        out.extend(pool_chunk);
        out.extend(resource_chunk);
        out.extend(content);
        out
    }

    /// Registers `name` in the resource map so it can be used as a
    /// resource-mapped attribute name. No-op when already present.
    pub(crate) fn ensure_resource_name(&mut self, name: &str, id: u32) {
        if self.resource_names.iter().any(|n| n.as_str() == name) {
            return;
        }
        self.resource_names.push(name.to_string());
        self.resource_ids.push(id);
    }

    pub(crate) fn resource_id(&self, name: &str) -> Option<u32> {
        self.resource_names
            .iter()
            .position(|n| n.as_str() == name)
            .map(|i| self.resource_ids[i])
    }
}
