#[derive(Debug, Default)]
pub struct OrientCounters {
    pub total: u64,
    pub forward: u64,
    pub reverse: u64,
    pub undetermined: u64,
}

impl std::ops::AddAssign for OrientCounters {
    fn add_assign(&mut self, other: Self) {
        self.total += other.total;
        self.forward += other.forward;
        self.reverse += other.reverse;
        self.undetermined += other.undetermined;
    }
}

#[derive(Debug, Default)]
pub struct SintaxCounters {
    pub total: u64,
    pub classified: u64,
}

impl std::ops::AddAssign for SintaxCounters {
    fn add_assign(&mut self, other: Self) {
        self.total += other.total;
        self.classified += other.classified;
    }
}
