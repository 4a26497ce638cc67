//! Local set definitions.
//!
//! A set definition lists, per entry position, the field id (or element
//! name) and a data type (usually one of the fixed-width aliases) so that
//! entries encoded against it carry no per-entry identification and little
//! or no length framing. Definitions travel in-band in a container's
//! set-definitions section; ids 0..=15 are local to that container.

use crate::error::{CodecError, Result};
use crate::iter::EncodeIter;
use crate::types::DataType;
use crate::wire;

/// Highest set id a local database can hold.
pub const MAX_LOCAL_SET_ID: u16 = 15;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSetDefEntry {
    pub field_id: i16,
    pub data_type: DataType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSetDef {
    pub set_id: u16,
    pub entries: Vec<FieldSetDefEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementSetDefEntry {
    /// Element name; owned because definitions outlive the defining buffer.
    pub name: Vec<u8>,
    pub data_type: DataType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementSetDef {
    pub set_id: u16,
    pub entries: Vec<ElementSetDefEntry>,
}

/// Database of field set definitions for one container.
#[derive(Debug, Clone, Default)]
pub struct LocalFieldSetDefDb {
    defs: Vec<FieldSetDef>,
}

/// Database of element set definitions for one container.
#[derive(Debug, Clone, Default)]
pub struct LocalElementSetDefDb {
    defs: Vec<ElementSetDef>,
}

impl LocalFieldSetDefDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, def: FieldSetDef) -> Result<()> {
        if def.set_id > MAX_LOCAL_SET_ID {
            return Err(CodecError::IllegalSetDef("set id above local range"));
        }
        if self.get(def.set_id).is_some() {
            return Err(CodecError::IllegalSetDef("duplicate set id"));
        }
        if def.entries.len() > usize::from(u8::MAX) {
            return Err(CodecError::IllegalSetDef("more than 255 entries"));
        }
        self.defs.push(def);
        Ok(())
    }

    pub fn get(&self, set_id: u16) -> Option<&FieldSetDef> {
        self.defs.iter().find(|d| d.set_id == set_id)
    }

    /// Decode a database from a container's set-definitions span.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut pos = 0;
        let _flags = wire::read_u8(data, &mut pos)?;
        let count = wire::read_u8(data, &mut pos)?;
        let mut db = Self::new();
        for _ in 0..count {
            let set_id = wire::read_u15rb(data, &mut pos)?;
            let entry_count = wire::read_u8(data, &mut pos)?;
            let mut entries = Vec::with_capacity(usize::from(entry_count));
            for _ in 0..entry_count {
                let field_id = wire::read_i16(data, &mut pos)?;
                let raw = wire::read_u8(data, &mut pos)?;
                let data_type =
                    DataType::try_from(raw).map_err(|_| CodecError::UnsupportedType(raw))?;
                entries.push(FieldSetDefEntry {
                    field_id,
                    data_type,
                });
            }
            db.add(FieldSetDef { set_id, entries })?;
        }
        Ok(db)
    }

    /// Encode this database into a container's set-definitions section.
    pub fn encode(&self, iter: &mut EncodeIter<'_>) -> Result<()> {
        if self.defs.is_empty() {
            return Err(CodecError::IllegalSetDef("empty database"));
        }
        iter.write_u8(0)?; // flags, none defined
        iter.write_u8(self.defs.len() as u8)?;
        for def in &self.defs {
            iter.write_u15rb(def.set_id)?;
            iter.write_u8(def.entries.len() as u8)?;
            for entry in &def.entries {
                iter.write_i16(entry.field_id)?;
                iter.write_u8(entry.data_type.into())?;
            }
        }
        Ok(())
    }
}

impl LocalElementSetDefDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, def: ElementSetDef) -> Result<()> {
        if def.set_id > MAX_LOCAL_SET_ID {
            return Err(CodecError::IllegalSetDef("set id above local range"));
        }
        if self.get(def.set_id).is_some() {
            return Err(CodecError::IllegalSetDef("duplicate set id"));
        }
        if def.entries.len() > usize::from(u8::MAX) {
            return Err(CodecError::IllegalSetDef("more than 255 entries"));
        }
        self.defs.push(def);
        Ok(())
    }

    pub fn get(&self, set_id: u16) -> Option<&ElementSetDef> {
        self.defs.iter().find(|d| d.set_id == set_id)
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut pos = 0;
        let _flags = wire::read_u8(data, &mut pos)?;
        let count = wire::read_u8(data, &mut pos)?;
        let mut db = Self::new();
        for _ in 0..count {
            let set_id = wire::read_u15rb(data, &mut pos)?;
            let entry_count = wire::read_u8(data, &mut pos)?;
            let mut entries = Vec::with_capacity(usize::from(entry_count));
            for _ in 0..entry_count {
                let name_len = wire::read_u15rb(data, &mut pos)? as usize;
                let name = wire::read_bytes(data, &mut pos, name_len)?.to_vec();
                let raw = wire::read_u8(data, &mut pos)?;
                let data_type =
                    DataType::try_from(raw).map_err(|_| CodecError::UnsupportedType(raw))?;
                entries.push(ElementSetDefEntry { name, data_type });
            }
            db.add(ElementSetDef { set_id, entries })?;
        }
        Ok(db)
    }

    pub fn encode(&self, iter: &mut EncodeIter<'_>) -> Result<()> {
        if self.defs.is_empty() {
            return Err(CodecError::IllegalSetDef("empty database"));
        }
        iter.write_u8(0)?;
        iter.write_u8(self.defs.len() as u8)?;
        for def in &self.defs {
            iter.write_u15rb(def.set_id)?;
            iter.write_u8(def.entries.len() as u8)?;
            for entry in &def.entries {
                iter.write_buffer15(&entry.name)?;
                iter.write_u8(entry.data_type.into())?;
            }
        }
        Ok(())
    }
}
