use crate::{CoreError, Pool, Vm, VmOs, VmType};

/// A validated request to stage one or more VMs of the same kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmRequest {
    pub vm_type: VmType,
    pub os: VmOs,
    pub quantity: u32,
}

impl VmRequest {
    /// Parse `<type> <os> [quantity]` arguments.
    ///
    /// Every problem is collected before returning, so the caller can show them all at once.
    ///
    /// # Errors
    /// Returns `CoreError::Validation` listing each invalid or missing argument.
    pub fn parse(args: &[&str]) -> Result<Self, CoreError> {
        let mut problems = Vec::new();

        let vm_type = match args.first() {
            Some(raw) => raw.parse::<VmType>().map_err(|e| problems.push(e.to_string())).ok(),
            None => {
                problems.push(format!(
                    "First parameter must be one of: {}",
                    VmType::accepted().join(", ")
                ));
                None
            }
        };

        let os = match args.get(1) {
            Some(raw) => raw.parse::<VmOs>().map_err(|e| problems.push(e.to_string())).ok(),
            None => {
                problems.push(format!(
                    "Second parameter must be one of: {}",
                    VmOs::accepted().join(", ")
                ));
                None
            }
        };

        let quantity = match args.get(2) {
            Some(raw) => match raw.parse::<u32>() {
                Ok(n) if n > 0 => Some(n),
                _ => {
                    problems.push(CoreError::InvalidQuantity((*raw).to_string()).to_string());
                    None
                }
            },
            None => Some(1),
        };

        if args.len() > 3 {
            problems.push(format!("Unexpected arguments: {}", args[3..].join(" ")));
        }

        match (vm_type, os, quantity) {
            (Some(vm_type), Some(os), Some(quantity)) if problems.is_empty() => Ok(Self {
                vm_type,
                os,
                quantity,
            }),
            _ => Err(CoreError::Validation(problems)),
        }
    }
}

impl Pool {
    /// Index for the next VM: one past the highest index in use, or 1 for an empty pool.
    ///
    /// # Errors
    /// Returns `CoreError::MalformedVmName` if an existing VM name does not carry
    /// the pool prefix followed by a number.
    pub fn next_index(&self) -> Result<u32, CoreError> {
        let mut highest = 0;
        for vm in &self.items {
            let index = vm
                .name
                .strip_prefix(self.vm_name_prefix.as_str())
                .and_then(|rest| rest.parse::<u32>().ok())
                .ok_or_else(|| CoreError::MalformedVmName {
                    name: vm.name.clone(),
                    prefix: self.vm_name_prefix.clone(),
                })?;
            highest = highest.max(index);
        }
        Ok(highest + 1)
    }

    /// Stage a new VM at the end of the inventory.
    ///
    /// # Errors
    /// Returns `CoreError::MalformedVmName` if the next index cannot be computed.
    pub fn add_vm(
        &mut self,
        vm_type: VmType,
        os: VmOs,
        notes: Option<String>,
    ) -> Result<&Vm, CoreError> {
        let index = self.next_index()?;
        let mut vm = Vm::new(vm_type, os, format!("{}{index:02}", self.vm_name_prefix));
        vm.notes = notes;
        self.items.push(vm);
        Ok(&self.items[self.items.len() - 1])
    }

    /// Stage `request.quantity` VMs and return their names.
    ///
    /// # Errors
    /// Returns `CoreError::MalformedVmName` if the next index cannot be computed;
    /// the inventory is left untouched in that case.
    pub fn add_vms(&mut self, request: &VmRequest) -> Result<Vec<String>, CoreError> {
        self.next_index()?;
        let mut names = Vec::with_capacity(request.quantity as usize);
        for _ in 0..request.quantity {
            names.push(self.add_vm(request.vm_type, request.os, None)?.name.clone());
        }
        Ok(names)
    }

    /// Remove the VM named exactly `name`. Returns whether anything was removed.
    pub fn remove_vm(&mut self, name: &str) -> bool {
        match self.items.iter().position(|vm| vm.name == name) {
            Some(pos) => {
                self.items.remove(pos);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_with_prefix(prefix: &str) -> Pool {
        let mut pool = Pool::new("alice");
        pool.vm_name_prefix = prefix.to_string();
        pool
    }

    #[test]
    fn test_add_vm_names_and_config() {
        let mut pool = pool_with_prefix("team-a");

        for vm_type in VmType::ALL {
            for os in VmOs::ALL {
                let expected_index = pool.items.len() + 1;
                let vm = pool.add_vm(vm_type, os, None).unwrap();
                assert_eq!(vm.name, format!("team-a{expected_index:02}"));
                assert_eq!(vm.config(), vm_type.config());
                assert_eq!(vm.state.as_deref(), Some("NEW"));
            }
        }

        assert_eq!(pool.items.len(), 12);
        assert_eq!(pool.items[0].name, "team-a01");
        assert_eq!(pool.items[11].name, "team-a12");
    }

    #[test]
    fn test_freed_index_is_not_reused() {
        let mut pool = pool_with_prefix("team-a");
        for _ in 0..4 {
            pool.add_vm(VmType::Small, VmOs::Redos73, None).unwrap();
        }

        assert!(pool.remove_vm("team-a02"));
        let vm = pool.add_vm(VmType::Medium, VmOs::Win10, None).unwrap();
        assert_eq!(vm.name, "team-a05");

        assert!(pool.remove_vm("team-a05"));
        assert!(pool.remove_vm("team-a04"));
        let vm = pool.add_vm(VmType::Medium, VmOs::Win10, None).unwrap();
        assert_eq!(vm.name, "team-a04");
    }

    #[test]
    fn test_remove_missing_vm_is_noop() {
        let mut pool = pool_with_prefix("team-a");
        pool.add_vm(VmType::Small, VmOs::Redos73, None).unwrap();

        assert!(!pool.remove_vm("team-a1"));
        assert!(!pool.remove_vm("team-a"));
        assert_eq!(pool.items.len(), 1);
    }

    #[test]
    fn test_insertion_order_preserved() {
        let mut pool = pool_with_prefix("p-");
        pool.add_vm(VmType::Large, VmOs::Win10, Some("db".into()))
            .unwrap();
        pool.add_vm(VmType::Small, VmOs::Redos73, None).unwrap();
        pool.remove_vm("p-01");
        pool.add_vm(VmType::Medium, VmOs::Astra17Orel, None).unwrap();

        let names: Vec<_> = pool.items.iter().map(|vm| vm.name.as_str()).collect();
        assert_eq!(names, vec!["p-02", "p-03"]);
    }

    #[test]
    fn test_malformed_name_is_reported() {
        let mut pool = pool_with_prefix("team-a");
        pool.items
            .push(Vm::new(VmType::Small, VmOs::Redos73, "legacy-vm"));

        let err = pool.add_vm(VmType::Small, VmOs::Redos73, None).unwrap_err();
        assert!(matches!(err, CoreError::MalformedVmName { .. }));
        assert_eq!(pool.items.len(), 1);
    }

    #[test]
    fn test_add_vms_quantity() {
        let mut pool = pool_with_prefix("team-b");
        let request = VmRequest::parse(&["medium", "astra17orel", "3"]).unwrap();
        let names = pool.add_vms(&request).unwrap();
        assert_eq!(names, vec!["team-b01", "team-b02", "team-b03"]);
    }

    #[test]
    fn test_request_defaults_to_one() {
        let request = VmRequest::parse(&["small", "redos73"]).unwrap();
        assert_eq!(request.quantity, 1);
        assert_eq!(request.vm_type, VmType::Small);
    }

    #[test]
    fn test_request_reports_all_problems() {
        let err = VmRequest::parse(&["tiny", "dos", "x"]).unwrap_err();
        let messages = err.messages();
        assert_eq!(messages.len(), 3);
        assert!(messages[0].contains("small, medium, large"));
        assert!(messages[1].contains("win10"));
        assert!(messages[2].contains("'x'"));

        let err = VmRequest::parse(&[]).unwrap_err();
        assert_eq!(err.messages().len(), 2);

        let err = VmRequest::parse(&["small", "win10", "0"]).unwrap_err();
        assert_eq!(err.messages().len(), 1);
    }
}
