use super::*;

impl Inst {
    /// The value this instruction defines, if any
    pub fn def(&self) -> Option<Value> {
        match self {
            Inst::Binary { dst, .. }
            | Inst::Cast { dst, .. }
            | Inst::Compare { dst, .. }
            | Inst::Load { dst, .. }
            | Inst::Phi { dst, .. } => Some(*dst),
            Inst::Call { dst, .. } => *dst,
            Inst::Store { .. } => None,
        }
    }

    /// All values this instruction reads
    pub fn uses(&self) -> Vec<Value> {
        match self {
            Inst::Binary { lhs, rhs, .. } | Inst::Compare { lhs, rhs, .. } => vec![*lhs, *rhs],
            Inst::Cast { src, .. } => vec![*src],
            Inst::Load { .. } => vec![],
            Inst::Store { src, .. } => vec![*src],
            Inst::Call { args, .. } => args.clone(),
            Inst::Phi { args, .. } => args.iter().map(|(_, v)| *v).collect(),
        }
    }

    pub fn is_phi(&self) -> bool {
        matches!(self, Inst::Phi { .. })
    }
}

impl fmt::Display for Inst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Inst::Binary { dst, op, lhs, rhs } => write!(f, "{} = {} {}, {}", dst, op, lhs, rhs),
            Inst::Cast { dst, op, src } => write!(f, "{} = {} {}", dst, op, src),
            Inst::Compare {
                dst,
                pred,
                lhs,
                rhs,
            } => write!(f, "{} = icmp {} {}, {}", dst, pred, lhs, rhs),
            Inst::Load { dst, location } => write!(f, "{} = load {}", dst, location),
            Inst::Store { location, src } => write!(f, "store {}, {}", src, location),
            Inst::Call { dst: Some(dst), .. } => write!(f, "{} = call", dst),
            Inst::Call { dst: None, .. } => write!(f, "call"),
            Inst::Phi { dst, args } => {
                write!(f, "{} = phi ", dst)?;
                for (i, (block, value)) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "[{} from {}]", value, block)?;
                }
                Ok(())
            }
        }
    }
}

impl fmt::Display for Terminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Terminator::Jump { target } => write!(f, "jump {}", target),
            Terminator::Branch {
                cond,
                if_true,
                if_false,
            } => write!(f, "br {}, {}, {}", cond, if_true, if_false),
            Terminator::Switch {
                value,
                cases,
                default,
            } => {
                write!(f, "switch {} [", value)?;
                for (i, (case, target)) in cases.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} -> {}", case, target)?;
                }
                write!(f, "], default {}", default)
            }
            Terminator::Return { val: Some(v) } => write!(f, "ret {}", v),
            Terminator::Return { val: None } => write!(f, "ret"),
            Terminator::Unreachable => write!(f, "unreachable"),
        }
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = &self.name {
            writeln!(f, "fn {} {{", name)?;
        } else {
            writeln!(f, "fn {{")?;
        }
        for block in &self.blocks {
            writeln!(f, "{}:", block.id)?;
            for inst in &block.instructions {
                writeln!(f, "  {}", inst)?;
            }
            writeln!(f, "  {}", block.terminator)?;
        }
        write!(f, "}}")
    }
}
