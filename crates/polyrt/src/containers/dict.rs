//! Dict - Open-Addressed Hash Table Over 16-Slot Blocks
//!
//! Storage is an array of blocks of 16 key/value slots, each slot with
//! one metadata byte:
//!
//! - `0xFF` empty: available for writing;
//! - `0xFE` protected: empty but reserved, only seen mid-insertion while
//!   a foreign collision chain is being relocated;
//! - otherwise bit 7 clear marks the head of a collision chain, and the
//!   low 7 bits index a fixed probe-offset table (identity, 15 unit
//!   jumps, triangle numbers, then large jumps) giving the distance to
//!   the next chain member; low bits of zero end the chain.
//!
//! Capacity is a power of two >= 16; the load factor limit is 0.99.
//! Insertion distinguishes three cases: the head slot is free
//! (*available*), the head slot already heads a chain (*hit*: walk it,
//! then extend through the probe table), or the head slot is the body of
//! a different chain (*relocate*: move that chain out, then claim the
//! slot). When the probe table is exhausted the table doubles and
//! reinserts.

use std::cell::UnsafeCell;
use std::fmt;
use std::ops::Deref;

use crate::error::Result;
use crate::object::{InstanceOf, Obj, ObjectHeader, ObjectType, Ref};
use crate::util::{hash_combine, str_hash};
use crate::value::convert::{conversion_error, str_bytes_of, TryFromAny, TypeNamed};
use crate::value::{ty, Any, AnyRaw, AnyView};

const BLOCK_CAP: u64 = 16;
const EMPTY: u8 = 0xFF;
const PROTECTED: u8 = 0xFE;
const NEW_HEAD: u8 = 0b0000_0000;
const NEW_TAIL: u8 = 0b1000_0000;
const LOAD_FACTOR: f64 = 0.99;

/// Probe offsets addressed by the low 7 metadata bits: identity, unit
/// jumps within a block's reach, quadratic (triangle-number) probing,
/// then large jumps for huge tables. 126 entries.
#[rustfmt::skip]
const NEXT_PROBE: [u64; 126] = [
    0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15,
    21, 28, 36, 45, 55, 66, 78, 91, 105, 120, 136, 153, 171, 190, 210, 231,
    253, 276, 300, 325, 351, 378, 406, 435, 465, 496, 528, 561, 595, 630,
    666, 703, 741, 780, 820, 861, 903, 946, 990, 1035, 1081, 1128, 1176,
    1225, 1275, 1326, 1378, 1431, 1485, 1540, 1596, 1653, 1711, 1770, 1830,
    1891, 1953, 2016, 2080, 2145, 2211, 2278, 2346, 2415, 2485, 2556, 2628,
    8515, 19110, 42778, 96141, 216153, 486591, 1092981, 2458653, 5532801,
    12442566, 27993903, 62983476, 141717030, 318844378, 717352503,
    1614057336, 3631522476, 8170957530, 18384510628, 41364789378,
    93070452520, 209408356380, 471168559170, 1060128894105, 2385289465695,
    5366898840628, 12075518705635, 27169915244790, 61132312065111,
    137547689707000, 309482283181501, 696335127828753, 1566753995631385,
    3525196511162271, 7931691992677701, 17846306936293605,
    40154190677507445, 90346928918121501, 203280589587557251,
    457381325854679626, 1029107982097042876, 2315492959180353330,
    5209859154120846435,
];

struct Block {
    meta: [u8; BLOCK_CAP as usize],
    data: [(Any, Any); BLOCK_CAP as usize],
}

impl Default for Block {
    fn default() -> Block {
        Block {
            meta: [EMPTY; BLOCK_CAP as usize],
            data: std::array::from_fn(|_| (Any::none(), Any::none())),
        }
    }
}

/// Seeds mixed into key hashes, one per key family.
struct KeySeeds {
    none: u64,
    int: u64,
    float: u64,
    ptr: u64,
    dtype: u64,
    device: u64,
    str_: u64,
    obj: u64,
}

fn seeds() -> &'static KeySeeds {
    static SEEDS: std::sync::OnceLock<KeySeeds> = std::sync::OnceLock::new();
    SEEDS.get_or_init(|| KeySeeds {
        none: hash_combine(str_hash(b"None"), 0),
        int: str_hash(b"int"),
        float: str_hash(b"float"),
        ptr: str_hash(b"Ptr"),
        dtype: str_hash(b"dtype"),
        device: str_hash(b"Device"),
        str_: str_hash(b"object.Str"),
        obj: str_hash(b"object.Object"),
    })
}

/// Hash a dictionary key. POD keys hash by tagged value (every NaN
/// canonicalized to one quiet NaN so NaN keys collide and are findable),
/// string keys by content, other object keys by pointer identity.
pub(crate) fn key_hash(raw: &AnyRaw) -> u64 {
    let s = seeds();
    match raw.type_index {
        ty::NONE => s.none,
        ty::BOOL => hash_combine(s.int, unsafe { raw.v.v_bool } as u64),
        ty::INT => hash_combine(s.int, unsafe { raw.v.v_int64 } as u64),
        ty::FLOAT => {
            let v = unsafe { raw.v.v_float64 };
            let v = if v.is_nan() { f64::NAN } else { v };
            hash_combine(s.float, v.to_bits())
        }
        ty::PTR => hash_combine(s.ptr, unsafe { raw.v.v_ptr } as u64),
        ty::DATA_TYPE => hash_combine(s.dtype, unsafe { raw.v.v_dtype }.to_bits()),
        ty::DEVICE => hash_combine(s.device, unsafe { raw.v.v_device }.to_bits()),
        ty::RAW_STR | ty::STR => {
            hash_combine(s.str_, str_hash(str_bytes_of(raw).expect("string key")))
        }
        _ => hash_combine(s.obj, unsafe { raw.obj_ptr() } as u64),
    }
}

/// Key equality paired with [`key_hash`]: bool and int compare as
/// integers, floats compare with NaN == NaN, strings by bytes, other
/// objects by identity.
pub(crate) fn key_equal(a: &AnyRaw, b: &AnyRaw) -> bool {
    fn int_of(raw: &AnyRaw) -> Option<i64> {
        match raw.type_index {
            ty::BOOL => Some(unsafe { raw.v.v_bool } as i64),
            ty::INT => Some(unsafe { raw.v.v_int64 }),
            _ => None,
        }
    }
    if let (Some(x), Some(y)) = (int_of(a), int_of(b)) {
        return x == y;
    }
    if let (Some(x), Some(y)) = (str_bytes_of(a), str_bytes_of(b)) {
        return x == y;
    }
    if a.type_index != b.type_index {
        return false;
    }
    match a.type_index {
        ty::NONE => true,
        ty::FLOAT => {
            let (x, y) = unsafe { (a.v.v_float64, b.v.v_float64) };
            x == y || (x.is_nan() && y.is_nan())
        }
        ty::PTR => unsafe { a.v.v_ptr == b.v.v_ptr },
        ty::DATA_TYPE => unsafe { a.v.v_dtype == b.v.v_dtype },
        ty::DEVICE => unsafe { a.v.v_device == b.v.v_device },
        _ => unsafe { a.obj_ptr() == b.obj_ptr() },
    }
}

enum TryInsert {
    /// The key was already present at this slot.
    Existing(u64),
    /// A fresh slot was claimed for the key.
    Inserted(u64),
    /// No slot reachable; the table must grow first.
    NeedGrow,
}

struct DictTable {
    capacity: u64,
    size: u64,
    blocks: Vec<Block>,
}

impl DictTable {
    fn with_capacity(capacity: u64) -> DictTable {
        if capacity == 0 {
            return DictTable { capacity: 0, size: 0, blocks: Vec::new() };
        }
        let capacity = crate::util::bit_ceil(capacity.max(BLOCK_CAP));
        let num_blocks = (capacity / BLOCK_CAP) as usize;
        let mut blocks = Vec::with_capacity(num_blocks);
        blocks.resize_with(num_blocks, Block::default);
        DictTable { capacity, size: 0, blocks }
    }

    #[inline]
    fn meta(&self, i: u64) -> u8 {
        self.blocks[(i / BLOCK_CAP) as usize].meta[(i % BLOCK_CAP) as usize]
    }

    #[inline]
    fn set_meta(&mut self, i: u64, meta: u8) {
        self.blocks[(i / BLOCK_CAP) as usize].meta[(i % BLOCK_CAP) as usize] = meta;
    }

    #[inline]
    fn kv(&self, i: u64) -> &(Any, Any) {
        &self.blocks[(i / BLOCK_CAP) as usize].data[(i % BLOCK_CAP) as usize]
    }

    #[inline]
    fn kv_mut(&mut self, i: u64) -> &mut (Any, Any) {
        &mut self.blocks[(i / BLOCK_CAP) as usize].data[(i % BLOCK_CAP) as usize]
    }

    /// Home slot of a hash: Fibonacci multiply, keep the top `log2(cap)`
    /// bits.
    #[inline]
    fn head_index(&self, hash: u64) -> u64 {
        11400714819323198485u64.wrapping_mul(hash) >> (self.capacity.leading_zeros() + 1)
    }

    #[inline]
    fn probe_offset(meta: u8) -> u64 {
        NEXT_PROBE[(meta & 0x7F) as usize]
    }

    #[inline]
    fn is_head(&self, i: u64) -> bool {
        self.meta(i) & 0x80 == 0
    }

    #[inline]
    fn with_offset(&self, i: u64, offset: u64) -> u64 {
        (i + offset) & (self.capacity - 1)
    }

    /// Next member of the chain through `i`, if any.
    #[inline]
    fn next_in_chain(&self, i: u64) -> Option<u64> {
        match Self::probe_offset(self.meta(i)) {
            0 => None,
            offset => Some(self.with_offset(i, offset)),
        }
    }

    /// Chain-link the low 7 bits while preserving the head bit.
    #[inline]
    fn set_next(&mut self, i: u64, jump: u8) {
        let meta = self.meta(i);
        self.set_meta(i, (meta & 0x80) | jump);
    }

    /// Find an empty slot reachable from `i` through the probe table.
    /// Probes stay within offsets smaller than the current size, so tiny
    /// tables grow instead of scanning far.
    fn probe(&self, i: u64) -> Option<(u64, u8)> {
        for jump in 1..NEXT_PROBE.len() {
            if NEXT_PROBE[jump] >= self.size {
                break;
            }
            let slot = self.with_offset(i, NEXT_PROBE[jump]);
            if self.meta(slot) == EMPTY {
                return Some((slot, jump as u8));
            }
        }
        None
    }

    fn lookup(&self, key: &AnyRaw) -> Option<u64> {
        if self.capacity == 0 {
            return None;
        }
        let mut i = self.head_index(key_hash(key));
        if self.meta(i) == EMPTY || self.meta(i) == PROTECTED || !self.is_head(i) {
            return None;
        }
        loop {
            if key_equal(key, self.kv(i).0.raw()) {
                return Some(i);
            }
            i = self.next_in_chain(i)?;
        }
    }

    /// The chain member whose link points at `i`. `i` must not be a head.
    fn prev(&self, i: u64) -> u64 {
        let mut prev = self.head_index(key_hash(self.kv(i).0.raw()));
        let mut next = self.with_offset(prev, Self::probe_offset(self.meta(prev)));
        while next != i {
            prev = next;
            next = self.with_offset(next, Self::probe_offset(self.meta(next)));
        }
        prev
    }

    fn try_insert_or_lookup(&mut self, key: &mut Any) -> TryInsert {
        if self.capacity == self.size || (self.size + 1) as f64 > self.capacity as f64 * LOAD_FACTOR
        {
            return TryInsert::NeedGrow;
        }
        let mut i = self.head_index(key_hash(key.raw()));
        let mut new_meta = NEW_HEAD;
        if self.meta(i) == EMPTY {
            // Case 1: available. Claim the home slot as a fresh head.
        } else if self.is_head(i) {
            // Case 2: hit. Walk the chain for the key, else append.
            loop {
                if key_equal(key.raw(), self.kv(i).0.raw()) {
                    return TryInsert::Existing(i);
                }
                match self.next_in_chain(i) {
                    Some(next) => i = next,
                    None => break,
                }
            }
            let Some((slot, jump)) = self.probe(i) else {
                return TryInsert::NeedGrow;
            };
            self.set_next(i, jump);
            i = slot;
            new_meta = NEW_TAIL;
        } else {
            // Case 3: relocate. The home slot belongs to the body of a
            // different chain; move that chain's tail out slot by slot,
            // then claim the freed home slot as a head.
            let mut prev = self.prev(i);
            let mut cur = Some(i);
            let mut replacement = PROTECTED;
            while let Some(slot) = cur {
                let Some((new_slot, jump)) = self.probe(prev) else {
                    return TryInsert::NeedGrow;
                };
                self.set_meta(new_slot, NEW_TAIL);
                let pair = std::mem::take(self.kv_mut(slot));
                *self.kv_mut(new_slot) = pair;
                let old_meta = self.meta(slot);
                self.set_meta(slot, replacement);
                self.set_next(prev, jump);
                prev = new_slot;
                cur = match Self::probe_offset(old_meta) {
                    0 => None,
                    offset => Some(self.with_offset(slot, offset)),
                };
                replacement = EMPTY;
            }
        }
        self.size += 1;
        self.set_meta(i, new_meta);
        let key = std::mem::take(key);
        *self.kv_mut(i) = (key, Any::none());
        TryInsert::Inserted(i)
    }

    fn erase_index(&mut self, i: u64) {
        match self.next_in_chain(i) {
            Some(mut next) => {
                // Pull the chain's last member back into the hole.
                let mut prev = i;
                while let Some(n) = self.next_in_chain(next) {
                    prev = next;
                    next = n;
                }
                let last = std::mem::take(self.kv_mut(next));
                *self.kv_mut(i) = last;
                self.set_meta(next, EMPTY);
                self.set_next(prev, 0);
            }
            None => {
                if !self.is_head(i) {
                    let prev = self.prev(i);
                    self.set_next(prev, 0);
                }
                self.set_meta(i, EMPTY);
                *self.kv_mut(i) = (Any::none(), Any::none());
            }
        }
        self.size -= 1;
    }

    fn occupied(&self, i: u64) -> bool {
        let meta = self.meta(i);
        meta != EMPTY && meta != PROTECTED
    }

    fn clear(&mut self) {
        for i in 0..self.capacity {
            if self.occupied(i) {
                *self.kv_mut(i) = (Any::none(), Any::none());
            }
            self.set_meta(i, EMPTY);
        }
        self.size = 0;
    }
}

#[repr(C)]
pub struct DictObj {
    pub(crate) header: ObjectHeader,
    table: UnsafeCell<DictTable>,
}

unsafe impl ObjectType for DictObj {
    const TYPE_KEY: &'static str = "object.Dict";
    fn type_index() -> i32 {
        ty::DICT
    }
}

unsafe impl InstanceOf<Obj> for DictObj {}

impl DictObj {
    /// A dict sized by the configured initial capacity.
    pub fn new() -> Ref<DictObj> {
        DictObj::with_capacity(crate::config::current().initial_dict_capacity as u64)
    }

    pub fn with_capacity(capacity: u64) -> Ref<DictObj> {
        Ref::new(DictObj {
            header: ObjectHeader::new_for::<DictObj>(),
            table: UnsafeCell::new(DictTable::with_capacity(capacity)),
        })
    }

    // SAFETY: same aliased single-threaded access contract as ListObj.
    fn table(&self) -> &DictTable {
        unsafe { &*self.table.get() }
    }

    #[allow(clippy::mut_from_ref)]
    fn table_mut(&self) -> &mut DictTable {
        unsafe { &mut *self.table.get() }
    }

    pub fn len(&self) -> usize {
        self.table().size as usize
    }

    pub fn is_empty(&self) -> bool {
        self.table().size == 0
    }

    pub fn capacity(&self) -> usize {
        self.table().capacity as usize
    }

    fn grow(&self) {
        let table = self.table_mut();
        let mut entries: Vec<(Any, Any)> = Vec::with_capacity(table.size as usize);
        for i in 0..table.capacity {
            if table.occupied(i) {
                entries.push(std::mem::take(table.kv_mut(i)));
            }
        }
        let mut new_cap = if table.capacity == 0 { BLOCK_CAP } else { table.capacity * 2 };
        'retry: loop {
            let mut fresh = DictTable::with_capacity(new_cap);
            for (k, v) in &entries {
                let mut key = k.clone();
                match fresh.try_insert_or_lookup(&mut key) {
                    TryInsert::Inserted(slot) | TryInsert::Existing(slot) => {
                        fresh.kv_mut(slot).1 = v.clone();
                    }
                    TryInsert::NeedGrow => {
                        new_cap *= 2;
                        continue 'retry;
                    }
                }
            }
            log::trace!("dict grow: capacity {} -> {}", table.capacity, new_cap);
            *table = fresh;
            return;
        }
    }

    /// Insert or overwrite. The key is stored owned; inserting an equal
    /// key replaces the value only.
    pub fn insert(&self, key: Any, value: Any) {
        let mut key = key;
        loop {
            match self.table_mut().try_insert_or_lookup(&mut key) {
                TryInsert::Inserted(slot) | TryInsert::Existing(slot) => {
                    self.table_mut().kv_mut(slot).1 = value;
                    return;
                }
                TryInsert::NeedGrow => self.grow(),
            }
        }
    }

    pub fn get(&self, key: AnyView<'_>) -> Option<Any> {
        let table = self.table();
        table.lookup(key.raw()).map(|i| table.kv(i).1.clone())
    }

    /// Lookup that fails with a `KeyError` rendering the missing key.
    pub fn at(&self, key: AnyView<'_>) -> Result<Any> {
        match self.get(key) {
            Some(v) => Ok(v),
            None => crate::throw!(KeyError, "{}", key),
        }
    }

    pub fn contains(&self, key: AnyView<'_>) -> bool {
        self.table().lookup(key.raw()).is_some()
    }

    pub fn erase(&self, key: AnyView<'_>) -> Result<()> {
        let table = self.table_mut();
        match table.lookup(key.raw()) {
            Some(i) => {
                table.erase_index(i);
                Ok(())
            }
            None => crate::throw!(KeyError, "{}", key),
        }
    }

    pub fn clear(&self) {
        self.table_mut().clear();
    }

    /// Snapshot of all entries in slot order.
    pub fn entries(&self) -> Vec<(Any, Any)> {
        let table = self.table();
        let mut out = Vec::with_capacity(table.size as usize);
        for i in 0..table.capacity {
            if table.occupied(i) {
                let kv = table.kv(i);
                out.push((kv.0.clone(), kv.1.clone()));
            }
        }
        out
    }

    /// Visit entries without snapshotting. The callback must not mutate
    /// this dict.
    pub(crate) fn for_each(&self, mut f: impl FnMut(&Any, &Any)) {
        let table = self.table();
        for i in 0..table.capacity {
            if table.occupied(i) {
                let kv = table.kv(i);
                f(&kv.0, &kv.1);
            }
        }
    }
}

impl fmt::Debug for DictObj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        self.for_each(|k, v| {
            map.entry(k, v);
        });
        map.finish()
    }
}

/// Strong handle to a [`DictObj`].
#[repr(transparent)]
#[derive(Clone)]
pub struct Dict {
    obj: Ref<DictObj>,
}

impl Dict {
    pub fn new() -> Dict {
        Dict { obj: DictObj::new() }
    }

    pub fn with_capacity(capacity: u64) -> Dict {
        Dict { obj: DictObj::with_capacity(capacity) }
    }

    /// Build from alternating `key, value` views.
    pub fn from_kv_views(views: &[AnyView<'_>]) -> Result<Dict> {
        crate::ensure!(
            views.len() % 2 == 0,
            TypeError,
            "Dict construction requires an even number of arguments, got {}",
            views.len()
        );
        let dict = Dict::with_capacity(views.len() as u64);
        for pair in views.chunks_exact(2) {
            dict.insert(pair[0].to_owned_any(), pair[1].to_owned_any());
        }
        Ok(dict)
    }

    pub(crate) fn from_obj(obj: Ref<DictObj>) -> Dict {
        debug_assert!(!obj.is_null());
        Dict { obj }
    }

    pub fn obj(&self) -> &Ref<DictObj> {
        &self.obj
    }

    pub fn iter(&self) -> impl Iterator<Item = (Any, Any)> {
        self.obj.entries().into_iter()
    }
}

impl Default for Dict {
    fn default() -> Self {
        Dict::new()
    }
}

impl Deref for Dict {
    type Target = DictObj;
    fn deref(&self) -> &DictObj {
        &self.obj
    }
}

impl fmt::Debug for Dict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.obj, f)
    }
}

impl From<Dict> for Any {
    fn from(dict: Dict) -> Any {
        Any::from(dict.obj)
    }
}

impl From<&Dict> for Any {
    fn from(dict: &Dict) -> Any {
        Any::from(dict.obj.clone())
    }
}

impl TryFromAny for Dict {
    fn try_from_any(raw: &AnyRaw) -> Result<Dict> {
        if raw.type_index == ty::DICT {
            let obj = unsafe { Ref::from_raw(raw.obj_ptr() as *mut DictObj) };
            Ok(Dict::from_obj(obj))
        } else {
            Err(conversion_error(raw, &Dict::type_str()))
        }
    }
}

impl TypeNamed for Dict {
    fn type_str() -> String {
        "object.Dict".to_string()
    }
}

impl crate::registry::reflect::ReflectedField for Dict {
    const ACCESS: crate::registry::FieldAccess = crate::registry::FieldAccess::ObjRef;
    fn type_desc() -> crate::registry::TypeDesc {
        crate::registry::TypeDesc::Dict(
            Box::new(crate::registry::TypeDesc::Any),
            Box::new(crate::registry::TypeDesc::Any),
        )
    }
}
