//! `serde` support for [`IdentityMap`].
//!
//! A map serializes as a sequence of `(key, value)` entries, with the
//! logical null key spelled as `None`. Deserialization replays the entries
//! through `insert`, allocating a fresh key and value object per entry, so
//! every deserialized key is a distinct identity and aliasing between
//! entries of the serialized form is not preserved.

use alloc::rc::Rc;
use core::fmt;
use core::marker::PhantomData;

use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::Serializer;
use serde::de::SeqAccess;
use serde::de::Visitor;
use serde::ser::SerializeSeq;

use crate::map::IdentityMap;

impl<K, V> Serialize for IdentityMap<K, V>
where
    K: Serialize,
    V: Serialize,
{
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let table = self.shared_table().borrow();
        let mut seq = serializer.serialize_seq(Some(table.len()))?;
        for (key, value) in table.slots().iter().flatten() {
            seq.serialize_element(&(key.to_option(), Rc::clone(value)))?;
        }
        seq.end()
    }
}

struct EntrySeqVisitor<K, V> {
    entry: PhantomData<(K, V)>,
}

impl<'de, K, V> Visitor<'de> for EntrySeqVisitor<K, V>
where
    K: Deserialize<'de>,
    V: Deserialize<'de>,
{
    type Value = IdentityMap<K, V>;

    fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("a sequence of (key, value) entries")
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
    where
        A: SeqAccess<'de>,
    {
        // A third of headroom on top of the announced length keeps the
        // replay from landing exactly on the growth threshold.
        let expected = seq.size_hint().unwrap_or(0);
        let map = IdentityMap::with_capacity(expected.saturating_mul(4) / 3);
        while let Some((key, value)) = seq.next_element::<(Option<Rc<K>>, Rc<V>)>()? {
            map.insert(key, value);
        }
        Ok(map)
    }
}

impl<'de, K, V> Deserialize<'de> for IdentityMap<K, V>
where
    K: Deserialize<'de>,
    V: Deserialize<'de>,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_seq(EntrySeqVisitor { entry: PhantomData })
    }
}
