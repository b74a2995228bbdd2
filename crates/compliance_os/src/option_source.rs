#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use compliance_engines::options::{FragmentFetchError, OptionFragmentSource};
use compliance_kernel_contracts::run::OptionsRef;
use compliance_kernel_contracts::Deadline;
use compliance_storage::ConfigObjectRepo;

/// Serves option fragments from config objects in the resource store.
pub struct StoreOptionSource<'a, S: ConfigObjectRepo + ?Sized> {
    store: &'a S,
    deadline: Deadline,
}

impl<'a, S: ConfigObjectRepo + ?Sized> StoreOptionSource<'a, S> {
    pub fn new(store: &'a S, deadline: Deadline) -> Self {
        Self { store, deadline }
    }
}

impl<S: ConfigObjectRepo + ?Sized> OptionFragmentSource for StoreOptionSource<'_, S> {
    fn fetch_fragment(
        &self,
        reference: &OptionsRef,
    ) -> Result<BTreeMap<String, String>, FragmentFetchError> {
        match self
            .store
            .get_config_object(&reference.namespace, &reference.name, self.deadline)
        {
            Ok(object) => Ok(object.data),
            Err(err) if err.is_not_found() => Err(FragmentFetchError::NotFound),
            Err(err) => Err(FragmentFetchError::Failed(err.to_string())),
        }
    }
}
