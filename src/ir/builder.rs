use super::*;

impl BasicBlock {
    /// Create a new basic block
    pub fn new(id: BlockId) -> Self {
        Self {
            id,
            instructions: Vec::new(),
            terminator: Terminator::Unreachable, // Must be replaced with a real terminator
        }
    }

    /// Get successor block IDs
    pub fn successors(&self) -> Vec<BlockId> {
        match &self.terminator {
            Terminator::Jump { target } => vec![*target],
            Terminator::Branch {
                if_true, if_false, ..
            } => vec![*if_true, *if_false],
            Terminator::Switch { cases, default, .. } => {
                let mut succs: Vec<BlockId> = cases.iter().map(|(_, b)| *b).collect();
                succs.push(*default);
                succs
            }
            Terminator::Return { .. } | Terminator::Unreachable => vec![],
        }
    }
}

impl Function {
    /// Create a new empty function
    pub fn new() -> Self {
        Self {
            name: None,
            blocks: Vec::new(),
            entry: BlockId(0),
            values: Vec::new(),
            constants: FxHashMap::default(),
            location_bits: Vec::new(),
        }
    }

    /// Create a new named function
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::new()
        }
    }

    /// Allocate a new basic block
    pub fn alloc_block(&mut self) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(BasicBlock::new(id));
        id
    }

    /// Allocate a value to be defined by an instruction
    pub fn alloc_value(&mut self, bits: u8) -> Value {
        self.new_value(bits, ValueKind::Inst)
    }

    /// Allocate a function parameter
    pub fn alloc_param(&mut self, bits: u8) -> Value {
        self.new_value(bits, ValueKind::Param)
    }

    /// Intern an integer constant of the given width
    ///
    /// The stored bit pattern is truncated to `bits`; requesting the same
    /// constant twice yields the same [`Value`].
    pub fn const_int(&mut self, value: u64, bits: u8) -> Value {
        let masked = DataLayout::truncate(value, bits);
        if let Some(&v) = self.constants.get(&(masked, bits)) {
            return v;
        }
        let v = self.new_value(bits, ValueKind::Const(masked));
        self.constants.insert((masked, bits), v);
        v
    }

    /// Declare a CPU-state location of the given width
    pub fn alloc_location(&mut self, bits: u8) -> Location {
        let id = Location(self.location_bits.len() as u32);
        self.location_bits.push(bits);
        id
    }

    fn new_value(&mut self, bits: u8, kind: ValueKind) -> Value {
        let v = Value(self.values.len() as u32);
        self.values.push(ValueInfo { bits, kind });
        v
    }

    /// Append an instruction to a block
    pub fn push(&mut self, block: BlockId, inst: Inst) {
        self.block_mut(block).instructions.push(inst);
    }

    /// Replace a block's terminator
    pub fn set_terminator(&mut self, block: BlockId, term: Terminator) {
        self.block_mut(block).terminator = term;
    }

    /// Get a reference to a block
    pub fn block(&self, id: BlockId) -> &BasicBlock {
        let idx = id.0 as usize;
        if let Some(block) = self.blocks.get(idx)
            && block.id == id
        {
            return block;
        }
        self.blocks
            .iter()
            .find(|b| b.id == id)
            .unwrap_or_else(|| panic!("Block {:?} not found", id))
    }

    /// Get a mutable reference to a block
    pub fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        let idx = id.0 as usize;
        let fast_path = self.blocks.get(idx).is_some_and(|b| b.id == id);
        if fast_path {
            return &mut self.blocks[idx];
        }
        self.blocks
            .iter_mut()
            .find(|b| b.id == id)
            .unwrap_or_else(|| panic!("Block {:?} not found", id))
    }

    /// Check if a block exists
    pub fn has_block(&self, id: BlockId) -> bool {
        let idx = id.0 as usize;
        if self.blocks.get(idx).is_some_and(|b| b.id == id) {
            return true;
        }
        self.blocks.iter().any(|b| b.id == id)
    }

    /// Width in bits of a value
    pub fn value_bits(&self, v: Value) -> u8 {
        self.values[v.0 as usize].bits
    }

    /// Kind of a value
    pub fn value_kind(&self, v: Value) -> ValueKind {
        self.values[v.0 as usize].kind
    }

    /// Constant bit pattern of a value, if it is an interned constant
    pub fn const_value(&self, v: Value) -> Option<u64> {
        match self.value_kind(v) {
            ValueKind::Const(c) => Some(c),
            _ => None,
        }
    }

    pub fn is_const(&self, v: Value) -> bool {
        matches!(self.value_kind(v), ValueKind::Const(_))
    }

    /// Width in bits of a CPU-state location
    pub fn location_bits(&self, loc: Location) -> u8 {
        self.location_bits[loc.0 as usize]
    }

    pub fn value_count(&self) -> u32 {
        self.values.len() as u32
    }

    /// Definition site of every instruction-defined value
    pub fn definitions(&self) -> FxHashMap<Value, (BlockId, usize)> {
        let mut defs = FxHashMap::default();
        for block in &self.blocks {
            for (idx, inst) in block.instructions.iter().enumerate() {
                if let Some(dst) = inst.def() {
                    defs.insert(dst, (block.id, idx));
                }
            }
        }
        defs
    }

    /// Use sites of every value, instruction operands and terminators alike
    ///
    /// Terminator uses are recorded with the index one past the last
    /// instruction of their block.
    pub fn users(&self) -> FxHashMap<Value, Vec<(BlockId, usize)>> {
        let mut users: FxHashMap<Value, Vec<(BlockId, usize)>> = FxHashMap::default();
        for block in &self.blocks {
            for (idx, inst) in block.instructions.iter().enumerate() {
                for used in inst.uses() {
                    users.entry(used).or_default().push((block.id, idx));
                }
            }
            let term_idx = block.instructions.len();
            for used in self.terminator_uses(&block.terminator) {
                users.entry(used).or_default().push((block.id, term_idx));
            }
        }
        users
    }

    fn terminator_uses(&self, term: &Terminator) -> Vec<Value> {
        match term {
            Terminator::Branch { cond, .. } => vec![*cond],
            Terminator::Switch { value, .. } => vec![*value],
            Terminator::Return { val: Some(v) } => vec![*v],
            _ => vec![],
        }
    }

    /// Check IR well-formedness
    ///
    /// Verifies the invariants the analysis relies on: every block is
    /// terminated, branch conditions are 1-bit, loads and stores match
    /// their location widths, phis lead their blocks, and every value is
    /// defined exactly once.
    pub fn validate(&self) -> Result<(), IrError> {
        for info in &self.values {
            if info.bits == 0 || info.bits > 64 {
                return Err(IrError::BadWidth(info.bits));
            }
        }

        let mut defined: Vec<bool> = self
            .values
            .iter()
            .map(|info| !matches!(info.kind, ValueKind::Inst))
            .collect();

        for block in &self.blocks {
            let mut seen_non_phi = false;
            for inst in &block.instructions {
                match inst {
                    Inst::Phi { dst, .. } if seen_non_phi => {
                        return Err(IrError::MisplacedPhi(*dst));
                    }
                    Inst::Phi { .. } => {}
                    _ => seen_non_phi = true,
                }

                if let Some(dst) = inst.def() {
                    let slot = defined
                        .get_mut(dst.0 as usize)
                        .ok_or(IrError::UndefinedValue(dst))?;
                    if *slot {
                        return Err(IrError::Redefined(dst));
                    }
                    *slot = true;
                }

                match inst {
                    Inst::Load { dst, location } => {
                        let want = self.location_bits(*location);
                        let got = self.value_bits(*dst);
                        if got != want {
                            return Err(IrError::WidthMismatch {
                                inst: *dst,
                                location: *location,
                                got,
                                want,
                            });
                        }
                    }
                    Inst::Store { location, src } => {
                        let want = self.location_bits(*location);
                        let got = self.value_bits(*src);
                        if got != want {
                            return Err(IrError::WidthMismatch {
                                inst: *src,
                                location: *location,
                                got,
                                want,
                            });
                        }
                    }
                    _ => {}
                }
            }

            match &block.terminator {
                Terminator::Unreachable if !block.instructions.is_empty() => {
                    return Err(IrError::MissingTerminator(block.id));
                }
                Terminator::Branch { cond, .. } => {
                    let bits = self.value_bits(*cond);
                    if bits != 1 {
                        return Err(IrError::BadCondition(*cond, bits));
                    }
                }
                _ => {}
            }

            for succ in block.successors() {
                if !self.has_block(succ) {
                    return Err(IrError::UnknownBlock(succ.0));
                }
            }
        }

        // Every instruction-defined value used somewhere must have a definition.
        for block in &self.blocks {
            for inst in &block.instructions {
                for used in inst.uses() {
                    if !defined
                        .get(used.0 as usize)
                        .copied()
                        .unwrap_or(false)
                    {
                        return Err(IrError::UndefinedValue(used));
                    }
                }
            }
        }

        Ok(())
    }
}

impl Default for Function {
    fn default() -> Self {
        Self::new()
    }
}
