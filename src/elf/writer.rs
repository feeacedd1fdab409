//! Adds a DT_NEEDED entry to a shared object without disturbing the rest of
//! the image. The grown `.dynamic` and `.dynstr` move into a fresh PT_LOAD
//! segment appended past the end of the file, together with the relocated
//! program header table; every original byte stays where the old runtime
//! expects it.

use goblin::container::{Container, Ctx};
use goblin::elf::dynamic::{Dyn, DT_NEEDED, DT_NULL, DT_STRSZ, DT_STRTAB};
use goblin::elf::header::{Header, EM_AARCH64, EM_MIPS};
use goblin::elf::program_header::{ProgramHeader, PF_R, PF_W, PT_DYNAMIC, PT_LOAD, PT_PHDR};
use goblin::elf::section_header::SectionHeader;
use goblin::elf::Elf;
use scroll::ctx::{SizeWith, TryIntoCtx};

use crate::elf::SoPatchError;

pub struct SoEditor<'a> {
    data: &'a [u8],
    header: Header,
    program_headers: Vec<ProgramHeader>,
    section_headers: Vec<SectionHeader>,
    section_names: Vec<u8>,
    dynamic: Vec<Dyn>,
    dynstr: Vec<u8>,
    ctx: Ctx,
}

impl<'a> SoEditor<'a> {
    pub fn from_data(data: &'a [u8]) -> Result<SoEditor<'a>, SoPatchError> {
        let elf = Elf::parse(data)?;
        let dynamic = elf.dynamic.as_ref().ok_or(SoPatchError::NoDynamicSection)?;

        let strtab_offset = dynamic.info.strtab;
        let strtab_size = dynamic.info.strsz;
        if strtab_size == 0
            || strtab_offset
                .checked_add(strtab_size)
                .map_or(true, |end| end > data.len())
        {
            return Err(SoPatchError::BadStringTable);
        }
        let dynstr = data[strtab_offset..strtab_offset + strtab_size].to_vec();

        let mut entries = dynamic.dyns.clone();
        if let Some(null) = entries.iter().position(|d| d.d_tag == DT_NULL) {
            entries.truncate(null);
        }

        let container = if elf.is_64 {
            Container::Big
        } else {
            Container::Little
        };
        let endianness = if elf.little_endian {
            scroll::Endian::Little
        } else {
            scroll::Endian::Big
        };

        let section_names = elf
            .section_headers
            .get(elf.header.e_shstrndx as usize)
            .and_then(|shdr| {
                let start = shdr.sh_offset as usize;
                let end = start.checked_add(shdr.sh_size as usize)?;
                data.get(start..end).map(<[u8]>::to_vec)
            })
            .unwrap_or_default();

        Ok(SoEditor {
            data,
            header: elf.header,
            program_headers: elf.program_headers.clone(),
            section_headers: elf.section_headers.clone(),
            section_names,
            dynamic: entries,
            dynstr,
            ctx: Ctx::new(container, endianness),
        })
    }

    /// Current dependency list, in load order.
    pub fn needed(&self) -> Vec<&str> {
        self.dynamic
            .iter()
            .filter(|d| d.d_tag == DT_NEEDED)
            .filter_map(|d| self.string_at(d.d_val as usize))
            .collect()
    }

    /// Appends `library` after the existing DT_NEEDED run. Nothing guards
    /// against a name that is already present; that choice is the caller's.
    pub fn add_needed(&mut self, library: &str) {
        let name_offset = self.dynstr.len() as u64;
        self.dynstr.extend_from_slice(library.as_bytes());
        self.dynstr.push(0);

        let insert_at = self
            .dynamic
            .iter()
            .rposition(|d| d.d_tag == DT_NEEDED)
            .map(|i| i + 1)
            .unwrap_or(0);
        self.dynamic.insert(
            insert_at,
            Dyn {
                d_tag: DT_NEEDED,
                d_val: name_offset,
            },
        );
    }

    pub fn build(&self) -> Result<Vec<u8>, SoPatchError> {
        let page = self.page_size();
        let phdr_size = ProgramHeader::size_with(&self.ctx);
        let dyn_size = Dyn::size_with(&self.ctx);

        let start_offset = round_up(self.data.len() as u64, page) as usize;
        let highest_vaddr = self
            .program_headers
            .iter()
            .map(|p| p.p_vaddr.saturating_add(p.p_memsz))
            .max()
            .unwrap_or(self.data.len() as u64);
        let start_vaddr = round_up(highest_vaddr, page);

        let pht_len = (self.program_headers.len() + 1) * phdr_size;
        let dynamic_offset = round_up((start_offset + pht_len) as u64, 8) as usize;
        let dynamic_len = (self.dynamic.len() + 1) * dyn_size;
        let dynstr_offset = dynamic_offset + dynamic_len;
        // one spare byte so no segment ends exactly at the end of the file;
        // binutils 2.30 readelf treats that as a truncated segment
        let region_len = dynstr_offset + self.dynstr.len() - start_offset + 1;

        let dynamic_vaddr = start_vaddr + (dynamic_offset - start_offset) as u64;
        let dynstr_vaddr = start_vaddr + (dynstr_offset - start_offset) as u64;

        let mut header = self.header;
        header.e_phoff = start_offset as u64;
        header.e_phnum = (self.program_headers.len() + 1) as u16;
        let sht_offset = header.e_shoff as usize;

        let mut phdrs = self.program_headers.clone();
        for phdr in &mut phdrs {
            match phdr.p_type {
                PT_PHDR => {
                    phdr.p_offset = start_offset as u64;
                    phdr.p_vaddr = start_vaddr;
                    phdr.p_paddr = start_vaddr;
                    phdr.p_filesz = pht_len as u64;
                    phdr.p_memsz = pht_len as u64;
                }
                PT_DYNAMIC => {
                    phdr.p_offset = dynamic_offset as u64;
                    phdr.p_vaddr = dynamic_vaddr;
                    phdr.p_paddr = dynamic_vaddr;
                    phdr.p_filesz = dynamic_len as u64;
                    phdr.p_memsz = dynamic_len as u64;
                }
                _ => {}
            }
        }
        phdrs.push(ProgramHeader {
            p_type: PT_LOAD,
            p_flags: PF_R | PF_W,
            p_offset: start_offset as u64,
            p_vaddr: start_vaddr,
            p_paddr: start_vaddr,
            p_filesz: region_len as u64,
            p_memsz: region_len as u64,
            p_align: page,
        });

        let mut entries = self.dynamic.clone();
        for entry in &mut entries {
            match entry.d_tag {
                DT_STRTAB => entry.d_val = dynstr_vaddr,
                DT_STRSZ => entry.d_val = self.dynstr.len() as u64,
                _ => {}
            }
        }
        entries.push(Dyn {
            d_tag: DT_NULL,
            d_val: 0,
        });

        let mut shdrs = self.section_headers.clone();
        for shdr in &mut shdrs {
            match self.section_name(shdr) {
                ".dynamic" => {
                    shdr.sh_offset = dynamic_offset as u64;
                    shdr.sh_addr = dynamic_vaddr;
                    shdr.sh_size = dynamic_len as u64;
                }
                ".dynstr" => {
                    shdr.sh_offset = dynstr_offset as u64;
                    shdr.sh_addr = dynstr_vaddr;
                    shdr.sh_size = self.dynstr.len() as u64;
                }
                _ => {}
            }
        }

        let mut output = vec![0u8; start_offset + region_len];
        output[..self.data.len()].copy_from_slice(self.data);

        header.try_into_ctx(&mut output[..], self.ctx.le)?;
        for (i, phdr) in phdrs.iter().enumerate() {
            phdr.clone()
                .try_into_ctx(&mut output[start_offset + i * phdr_size..], self.ctx)?;
        }
        for (i, entry) in entries.iter().enumerate() {
            entry
                .clone()
                .try_into_ctx(&mut output[dynamic_offset + i * dyn_size..], self.ctx)?;
        }
        output[dynstr_offset..dynstr_offset + self.dynstr.len()].copy_from_slice(&self.dynstr);

        if sht_offset != 0 && !shdrs.is_empty() {
            let shdr_size = SectionHeader::size_with(&self.ctx);
            for (i, shdr) in shdrs.iter().enumerate() {
                let at = sht_offset + i * shdr_size;
                if at + shdr_size <= output.len() {
                    shdr.clone().try_into_ctx(&mut output[at..], self.ctx)?;
                }
            }
        }

        Ok(output)
    }

    fn string_at(&self, offset: usize) -> Option<&str> {
        let bytes = self.dynstr.get(offset..)?;
        let end = bytes.iter().position(|&b| b == 0)?;
        std::str::from_utf8(&bytes[..end]).ok()
    }

    fn section_name(&self, shdr: &SectionHeader) -> &str {
        let start = shdr.sh_name;
        if start >= self.section_names.len() {
            return "";
        }
        let bytes = &self.section_names[start..];
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        std::str::from_utf8(&bytes[..end]).unwrap_or("")
    }

    // arm64 devices may run 16K (or, conservatively, 64K) pages; MIPS
    // historically needs 64K. Everything else Android ships on is 4K.
    fn page_size(&self) -> u64 {
        match self.header.e_machine {
            EM_AARCH64 | EM_MIPS => 0x10000,
            _ => 0x1000,
        }
    }
}

fn round_up(value: u64, alignment: u64) -> u64 {
    (value + alignment - 1) & !(alignment - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::build_so;

    #[test]
    fn reads_dependency_list_in_order() {
        let so = build_so(&["libc.so", "liblog.so"]);
        let editor = SoEditor::from_data(&so).unwrap();
        assert_eq!(editor.needed(), vec!["libc.so", "liblog.so"]);
    }

    #[test]
    fn injects_dependency_after_existing_entries() {
        let so = build_so(&["libc.so", "liblog.so"]);
        let mut editor = SoEditor::from_data(&so).unwrap();
        editor.add_needed("libfrida-gadget.so");
        let patched = editor.build().unwrap();

        let elf = Elf::parse(&patched).unwrap();
        assert_eq!(
            elf.libraries,
            vec!["libc.so", "liblog.so", "libfrida-gadget.so"]
        );
        assert_eq!(elf.header.e_entry, 0);
        assert_eq!(
            elf.header.e_phnum,
            SoEditor::from_data(&so).unwrap().header.e_phnum + 1
        );
    }

    #[test]
    fn original_bytes_outside_headers_survive() {
        let so = build_so(&["libc.so"]);
        let mut editor = SoEditor::from_data(&so).unwrap();
        editor.add_needed("libfrida-gadget.so");
        let patched = editor.build().unwrap();

        // the old dynstr region is stale but untouched
        let strtab = 0xB0;
        assert_eq!(&patched[strtab..strtab + 9], &so[strtab..strtab + 9]);
        assert!(patched.len() > so.len());
    }

    #[test]
    fn patched_image_can_be_patched_again() {
        let so = build_so(&["libc.so"]);
        let mut editor = SoEditor::from_data(&so).unwrap();
        editor.add_needed("libfrida-gadget.so");
        let once = editor.build().unwrap();

        let mut editor = SoEditor::from_data(&once).unwrap();
        assert_eq!(editor.needed(), vec!["libc.so", "libfrida-gadget.so"]);

        // the editor itself does not deduplicate
        editor.add_needed("libfrida-gadget.so");
        let twice = editor.build().unwrap();
        let elf = Elf::parse(&twice).unwrap();
        assert_eq!(
            elf.libraries
                .iter()
                .filter(|&&l| l == "libfrida-gadget.so")
                .count(),
            2
        );
    }

    #[test]
    fn rejects_non_elf_input() {
        assert!(matches!(
            SoEditor::from_data(b"not an elf at all"),
            Err(SoPatchError::Parse(_))
        ));
    }

    #[test]
    fn rejects_image_without_dynamic_section() {
        let mut so = build_so(&["libc.so"]);
        // blank out the PT_DYNAMIC entry's p_type
        let second_phdr = 64 + 56;
        so[second_phdr..second_phdr + 4].copy_from_slice(&0u32.to_le_bytes());
        assert!(matches!(
            SoEditor::from_data(&so),
            Err(SoPatchError::NoDynamicSection)
        ));
    }
}
