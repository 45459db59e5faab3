//! ELF images as patchable modules.
//!
//! An `ElfImage` owns the bytes of an ELF file and exposes its `.init`
//! and `.text` sections as the module's code areas, the same split a
//! loaded module has between short-lived init code and its permanent
//! core. Patches land in the owned buffer; `save_as` writes the whole
//! image back out. [`ImageDirectory`] is the [`ModuleDirectory`]
//! implementation over a set of loaded images.

use std::path::Path;

use log::debug;
use object::{Object, ObjectSymbol, SymbolKind};

use crate::error::{Error, Result};
use crate::module::{ModuleDirectory, ModuleId, ModuleRegions};
use crate::region::CodeRegion;
use crate::types::{PointerWidth, VirtAddr};

/// File-backed span of one executable section.
#[derive(Debug, Clone, Copy)]
pub struct SectionSpan {
    /// Offset of the section's bytes in the file.
    pub file_off: usize,
    /// Address the section is linked at.
    pub vaddr: VirtAddr,
    /// Section size in bytes.
    pub size: usize,
}

impl SectionSpan {
    fn file_end(&self) -> usize {
        self.file_off + self.size
    }
}

/// A function symbol resolved from the image.
#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub addr: VirtAddr,
}

/// An ELF file held in memory with its code sections located.
pub struct ElfImage {
    name: String,
    data: Vec<u8>,
    width: PointerWidth,
    init: Option<SectionSpan>,
    text: SectionSpan,
    symbols: Vec<Symbol>,
}

impl ElfImage {
    /// Load an ELF file and locate its code sections and symbols.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self::parse(name, data)
    }

    /// Build an image from ELF bytes already in memory.
    pub fn parse(name: String, data: Vec<u8>) -> Result<Self> {
        let elf = goblin::elf::Elf::parse(&data)
            .map_err(|e| Error::Image(format!("parse ELF: {}", e)))?;

        let width = if elf.is_64 {
            PointerWidth::U64
        } else {
            PointerWidth::U32
        };

        let mut init = None;
        let mut text = None;
        for sh in &elf.section_headers {
            let sec_name = match elf.shdr_strtab.get_at(sh.sh_name) {
                Some(n) => n,
                None => continue,
            };
            if sec_name != ".init" && sec_name != ".text" {
                continue;
            }
            if sh.sh_type != goblin::elf::section_header::SHT_PROGBITS {
                return Err(Error::Image(format!(
                    "section {} is not backed by file contents",
                    sec_name
                )));
            }
            let span = SectionSpan {
                file_off: sh.sh_offset as usize,
                vaddr: VirtAddr(sh.sh_addr),
                size: sh.sh_size as usize,
            };
            if sec_name == ".init" {
                init = Some(span);
            } else {
                text = Some(span);
            }
        }
        let text = match text {
            Some(t) => t,
            None => return Err(Error::Image("no .text section".into())),
        };

        let symbols = collect_symbols(&data)?;
        Self::from_parts(name, data, width, init, text, symbols)
    }

    /// Assemble an image from raw parts, for code that is not backed
    /// by an ELF file.
    pub fn from_parts(
        name: String,
        data: Vec<u8>,
        width: PointerWidth,
        init: Option<SectionSpan>,
        text: SectionSpan,
        symbols: Vec<Symbol>,
    ) -> Result<Self> {
        // an empty init section means the init area is gone
        let init = init.filter(|s| s.size > 0);
        if text.file_end() > data.len() {
            return Err(Error::Image("text section extends past the file".into()));
        }
        if let Some(init_span) = init {
            if init_span.file_end() > data.len() {
                return Err(Error::Image("init section extends past the file".into()));
            }
            if init_span.file_off < text.file_end() && text.file_off < init_span.file_end() {
                return Err(Error::Image("init and text sections overlap".into()));
            }
        }
        Ok(Self {
            name,
            data,
            width,
            init,
            text,
            symbols,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn width(&self) -> PointerWidth {
        self.width
    }

    pub fn init_span(&self) -> Option<SectionSpan> {
        self.init
    }

    pub fn text_span(&self) -> SectionSpan {
        self.text
    }

    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    /// Resolve a function symbol to its address.
    pub fn lookup(&self, name: &str) -> Option<VirtAddr> {
        self.symbols.iter().find(|s| s.name == name).map(|s| s.addr)
    }

    /// The image's bytes, including any applied patches.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Borrow the init (if present) and core areas as disjoint mutable
    /// regions.
    pub fn regions(&mut self) -> ModuleRegions<'_> {
        let text = self.text;
        match self.init {
            None => ModuleRegions {
                init: None,
                core: carve(&mut self.data, 0, text),
            },
            Some(init) if init.file_off < text.file_off => {
                let (head, tail) = self.data.split_at_mut(text.file_off);
                ModuleRegions {
                    init: Some(carve(head, 0, init)),
                    core: carve(tail, text.file_off, text),
                }
            }
            Some(init) => {
                let (head, tail) = self.data.split_at_mut(init.file_off);
                ModuleRegions {
                    init: Some(carve(tail, init.file_off, init)),
                    core: carve(head, 0, text),
                }
            }
        }
    }

    /// Write the image, patches included, to `path`.
    pub fn save_as(&self, path: &Path) -> Result<()> {
        std::fs::write(path, &self.data)?;
        Ok(())
    }
}

/// Region over `span` within `buf`, where `buf` starts at file offset
/// `off`.
fn carve<'a>(buf: &'a mut [u8], off: usize, span: SectionSpan) -> CodeRegion<'a> {
    let start = span.file_off - off;
    CodeRegion::new(&mut buf[start..start + span.size], span.vaddr)
}

fn collect_symbols(data: &[u8]) -> Result<Vec<Symbol>> {
    let obj = object::File::parse(data)
        .map_err(|e| Error::Image(format!("parse symbols: {}", e)))?;

    let mut symbols = Vec::new();
    for sym in obj.symbols().chain(obj.dynamic_symbols()) {
        if sym.kind() != SymbolKind::Text || sym.address() == 0 {
            continue;
        }
        if let Ok(name) = sym.name() {
            if !name.is_empty() {
                symbols.push(Symbol {
                    name: name.to_string(),
                    addr: VirtAddr(sym.address()),
                });
            }
        }
    }

    // Sort by address for stable listing
    symbols.sort_by_key(|s| s.addr);
    Ok(symbols)
}

struct Slot {
    image: ElfImage,
    pins: usize,
}

/// A set of loaded images addressable by module name.
pub struct ImageDirectory {
    slots: Vec<Option<Slot>>,
}

impl ImageDirectory {
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// Register an image; its name becomes the module name.
    pub fn insert(&mut self, image: ElfImage) -> ModuleId {
        let id = ModuleId(self.slots.len());
        debug!("registered module '{}' as id {}", image.name(), id.0);
        self.slots.push(Some(Slot { image, pins: 0 }));
        id
    }

    /// Load an ELF file and register it.
    pub fn load(&mut self, path: &Path) -> Result<ModuleId> {
        Ok(self.insert(ElfImage::load(path)?))
    }

    pub fn get(&self, id: ModuleId) -> Option<&ElfImage> {
        self.slots.get(id.0)?.as_ref().map(|s| &s.image)
    }

    /// Pins currently held on a module.
    pub fn pin_count(&self, id: ModuleId) -> usize {
        self.slots
            .get(id.0)
            .and_then(|s| s.as_ref())
            .map_or(0, |s| s.pins)
    }

    /// Unregister a module. Refused while any pin is held.
    pub fn remove(&mut self, id: ModuleId) -> Result<ElfImage> {
        let slot = match self.slots.get_mut(id.0) {
            Some(s) => s,
            None => return Err(Error::ModuleNotFound(format!("id {}", id.0))),
        };
        match slot.take() {
            None => Err(Error::ModuleNotFound(format!("id {}", id.0))),
            Some(s) if s.pins > 0 => {
                let name = s.image.name().to_string();
                *slot = Some(s);
                Err(Error::ModulePinned(name))
            }
            Some(s) => Ok(s.image),
        }
    }
}

impl ModuleDirectory for ImageDirectory {
    fn find(&self, name: &str) -> Option<ModuleId> {
        self.slots.iter().enumerate().find_map(|(i, slot)| {
            slot.as_ref()
                .filter(|s| s.image.name() == name)
                .map(|_| ModuleId(i))
        })
    }

    fn pin(&mut self, id: ModuleId) -> Result<()> {
        match self.slots.get_mut(id.0).and_then(|s| s.as_mut()) {
            Some(s) => {
                s.pins += 1;
                Ok(())
            }
            None => Err(Error::PinFailed(format!("id {}", id.0))),
        }
    }

    fn unpin(&mut self, id: ModuleId) {
        if let Some(s) = self.slots.get_mut(id.0).and_then(|s| s.as_mut()) {
            s.pins = s.pins.saturating_sub(1);
        }
    }

    fn regions(&mut self, id: ModuleId) -> Result<ModuleRegions<'_>> {
        match self.slots.get_mut(id.0).and_then(|s| s.as_mut()) {
            Some(s) => Ok(s.image.regions()),
            None => Err(Error::ModuleNotFound(format!("id {}", id.0))),
        }
    }
}
