//! Options of a bulk archive request

bitflags::bitflags! {
    /// Option bits passed along with a file list (`AR_OPT_*`).
    pub struct ArchiveOptions: u32 {
        const COPY_1 = 0x0000_0001;
        const COPY_2 = 0x0000_0002;
        const COPY_3 = 0x0000_0004;
        const COPY_4 = 0x0000_0008;
        const DEFAULTS = 0x0000_0010;
        const NEVER = 0x0000_0020;
        const RECURSIVE = 0x0000_0040;
        const CONCURRENT = 0x0000_0080;
        const INCONSISTENT = 0x0000_0100;

        const COPY_MASK = Self::COPY_1.bits | Self::COPY_2.bits | Self::COPY_3.bits | Self::COPY_4.bits;
    }
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        Self::empty()
    }
}

impl ArchiveOptions {
    /// Options bits other than copy selection and recursion turn the
    /// request into "set archive options" without scheduling archiving.
    pub fn schedules_archiving(&self) -> bool {
        (*self - (Self::COPY_MASK | Self::RECURSIVE)).is_empty()
    }

    /// No copy selected means all copies.
    pub fn applies_to_all_copies(&self) -> bool {
        !self.intersects(Self::COPY_MASK)
    }

    /// Selected copy numbers, 1 based.
    pub fn copies(&self) -> Vec<u8> {
        [Self::COPY_1, Self::COPY_2, Self::COPY_3, Self::COPY_4]
            .iter()
            .enumerate()
            .filter(|(_, flag)| self.contains(**flag))
            .map(|(i, _)| i as u8 + 1)
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::ArchiveOptions;

    #[test]
    fn option_bits_decide_scheduling() {
        let opts = ArchiveOptions::COPY_2 | ArchiveOptions::RECURSIVE;
        assert!(opts.schedules_archiving());
        assert!(!opts.applies_to_all_copies());
        assert_eq!(opts.copies(), vec![2]);

        let opts = ArchiveOptions::NEVER | ArchiveOptions::RECURSIVE;
        assert!(!opts.schedules_archiving());
        assert!(opts.applies_to_all_copies());

        assert!(ArchiveOptions::empty().schedules_archiving());
        assert_eq!(ArchiveOptions::INCONSISTENT.bits(), 0x100);
    }
}
