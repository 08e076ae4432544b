//! Compact encoding for lists of keys, used when persisting sample keys.

use crate::serialize::{LoadContext, Persistent, SaveContext, SerializeError};
use crate::table::value::OwningKey;

pub fn write_unversioned_rowset(context: &mut SaveContext, keys: &[OwningKey]) {
    context.write_size(keys.len());
    for key in keys {
        key.save(context);
    }
}

pub fn read_unversioned_rowset(
    context: &mut LoadContext<'_>,
) -> Result<Vec<OwningKey>, SerializeError> {
    let count = context.read_size()?;
    let mut keys = Vec::with_capacity(count.min(context.remaining()));
    for _ in 0..count {
        keys.push(OwningKey::load(context)?);
    }
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::value::Value;

    #[test]
    fn rowset_preserves_keys() {
        let keys = vec![
            OwningKey::new(vec![Value::Int64(1)]),
            OwningKey::new(vec![Value::Int64(5), Value::string("x")]),
            OwningKey::default(),
        ];
        let mut save = SaveContext::new();
        write_unversioned_rowset(&mut save, &keys);
        let bytes = save.finish();
        let mut load = LoadContext::new(&bytes).unwrap();
        assert_eq!(read_unversioned_rowset(&mut load).unwrap(), keys);
    }

    #[test]
    fn truncated_rowset_fails() {
        let mut save = SaveContext::new();
        save.write_size(3);
        let bytes = save.finish();
        let mut load = LoadContext::new(&bytes).unwrap();
        assert!(read_unversioned_rowset(&mut load).is_err());
    }
}
