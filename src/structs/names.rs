use std::collections::HashSet;

/// Hands out fresh names of the form `<prefix><k>`, skipping the ones
/// already taken.
#[derive(Debug, Clone)]
pub struct NameAllocator {
    prefix: String,
    count: usize,
    taken: HashSet<String>,
}
impl NameAllocator {
    pub fn new<S: AsRef<str>>(prefix: S) -> Self {
        NameAllocator {
            prefix: prefix.as_ref().to_owned(),
            count: 0,
            taken: HashSet::new(),
        }
    }

    /// Mark `name` as used, so that it is never generated.
    pub fn reserve<S: AsRef<str>>(&mut self, name: S) {
        self.taken.insert(name.as_ref().to_owned());
    }

    pub fn fresh(&mut self) -> String {
        loop {
            let name = format!("{}{}", self.prefix, self.count);
            self.count += 1;
            if self.taken.insert(name.clone()) {
                return name;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_names() {
        let mut names = NameAllocator::new("_t");
        names.reserve("_t1");
        assert_eq!(names.fresh(), "_t0");
        assert_eq!(names.fresh(), "_t2");

        // allocators are independent
        let mut other = NameAllocator::new("_t");
        assert_eq!(other.fresh(), "_t0");
    }
}
