use std::io::Write;

use crate::{Attribute, HResult, provider::SlotDescriptor};

/// Writes the human readable listing, one block per slot and per key.
///
/// Every block is flushed as soon as it is written, so the blocks produced
/// before a fatal error are not lost.
pub struct Report<W: Write> {
    out: W,
}

impl<W: Write> Report<W> {
    pub const fn new(out: W) -> Self {
        Self { out }
    }

    pub fn slot(&mut self, slot: &SlotDescriptor) -> HResult<()> {
        writeln!(self.out, "slot:")?;
        writeln!(self.out, "  id: {}", slot.slot_id)?;
        writeln!(self.out, "  description: {}", slot.slot.description)?;
        writeln!(self.out, "  token: {}", slot.token.label)?;
        self.out.flush()?;
        Ok(())
    }

    pub fn private_keys(&mut self) -> HResult<()> {
        writeln!(self.out, "  private_keys:")?;
        self.out.flush()?;
        Ok(())
    }

    pub fn private_key(&mut self, attributes: &[Attribute]) -> HResult<()> {
        writeln!(self.out, "    -")?;
        for attribute in attributes {
            writeln!(self.out, "      {attribute}")?;
        }
        self.out.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}
