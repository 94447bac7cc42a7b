//! Tensor - DLPack-Shaped N-Dimensional Array
//!
//! Wraps the DLPack tensor layout plus a manager context. Shape and
//! strides arrays (and the data, when allocated here) are owned by the
//! object; externally managed storage is adopted through `manager_ctx`
//! and a release callback invoked on the final decref.
//!
//! Byte form (little-endian):
//!
//! | Offset | Size | Content |
//! |---|---|---|
//! | 0 | 8 | magic `0xDD5E40F096B4A13F` |
//! | 8 | 4 | ndim (u32) |
//! | 12 | 4 | dtype `(code u8, bits u8, lanes u16)` |
//! | 16 | 8·ndim | shape (i64 each) |
//! | 16+8·ndim | numel·elem_size | raw data |

use std::ffi::c_void;
use std::fmt;
use std::ops::Deref;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::error::Result;
use crate::object::{Deleter, InstanceOf, Obj, ObjectHeader, ObjectType, Ref};
use crate::value::convert::{conversion_error, TryFromAny, TypeNamed};
use crate::value::{ty, Any, AnyRaw, DataType, Device, DEVICE_CPU};

const TENSOR_MAGIC: u64 = 0xDD5E40F096B4A13F;

/// DLPack-compatible tensor descriptor.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct TensorData {
    pub data: *mut c_void,
    pub device: Device,
    pub ndim: i32,
    pub dtype: DataType,
    pub shape: *mut i64,
    pub strides: *mut i64,
    pub byte_offset: u64,
}

#[repr(C)]
pub struct TensorObj {
    pub(crate) header: ObjectHeader,
    pub tensor: TensorData,
    pub manager_ctx: *mut c_void,
    shape_storage: Option<Box<[i64]>>,
    strides_storage: Option<Box<[i64]>>,
    data_storage: Option<Box<[u8]>>,
    external_release: Option<Deleter>,
}

unsafe impl ObjectType for TensorObj {
    const TYPE_KEY: &'static str = "object.Tensor";
    fn type_index() -> i32 {
        ty::TENSOR
    }
}

unsafe impl InstanceOf<Obj> for TensorObj {}

impl Drop for TensorObj {
    fn drop(&mut self) {
        if let Some(release) = self.external_release {
            unsafe { release(self.manager_ctx) };
        }
    }
}

impl TensorObj {
    /// Allocate a CPU tensor owning `data` with the given shape.
    pub fn from_parts(shape: Vec<i64>, dtype: DataType, data: Vec<u8>) -> Result<Ref<TensorObj>> {
        let numel: i64 = shape.iter().product::<i64>().max(0);
        let expected = numel as usize * dtype.size();
        crate::ensure!(
            data.len() == expected,
            ValueError,
            "Tensor data size mismatch: expected {} bytes for shape {:?} of {}, got {}",
            expected,
            shape,
            dtype,
            data.len()
        );
        let shape_storage = shape.into_boxed_slice();
        let data_storage = data.into_boxed_slice();
        let tensor = TensorData {
            data: data_storage.as_ptr() as *mut c_void,
            device: DEVICE_CPU,
            ndim: shape_storage.len() as i32,
            dtype,
            shape: shape_storage.as_ptr() as *mut i64,
            strides: std::ptr::null_mut(),
            byte_offset: 0,
        };
        Ok(Ref::new(TensorObj {
            header: ObjectHeader::new_for::<TensorObj>(),
            tensor,
            manager_ctx: std::ptr::null_mut(),
            shape_storage: Some(shape_storage),
            strides_storage: None,
            data_storage: Some(data_storage),
            external_release: None,
        }))
    }

    /// Adopt externally owned storage. The shape (and strides, if any)
    /// are copied; `release` is invoked once with `manager_ctx` when the
    /// object dies.
    ///
    /// # Safety
    ///
    /// `tensor.data` must stay valid until `release` runs.
    pub unsafe fn from_external(
        tensor: TensorData,
        manager_ctx: *mut c_void,
        release: Option<Deleter>,
    ) -> Ref<TensorObj> {
        let ndim = tensor.ndim as usize;
        let shape_storage: Box<[i64]> =
            std::slice::from_raw_parts(tensor.shape, ndim).to_vec().into_boxed_slice();
        let strides_storage: Option<Box<[i64]>> = if tensor.strides.is_null() {
            None
        } else {
            Some(std::slice::from_raw_parts(tensor.strides, ndim).to_vec().into_boxed_slice())
        };
        let mut tensor = tensor;
        tensor.shape = shape_storage.as_ptr() as *mut i64;
        tensor.strides = strides_storage
            .as_ref()
            .map(|s| s.as_ptr() as *mut i64)
            .unwrap_or(std::ptr::null_mut());
        Ref::new(TensorObj {
            header: ObjectHeader::new_for::<TensorObj>(),
            tensor,
            manager_ctx,
            shape_storage: Some(shape_storage),
            strides_storage,
            data_storage: None,
            external_release: release,
        })
    }

    pub fn shape(&self) -> &[i64] {
        unsafe { std::slice::from_raw_parts(self.tensor.shape, self.tensor.ndim as usize) }
    }

    pub fn strides(&self) -> Option<&[i64]> {
        if self.tensor.strides.is_null() {
            None
        } else {
            Some(unsafe {
                std::slice::from_raw_parts(self.tensor.strides, self.tensor.ndim as usize)
            })
        }
    }

    pub fn dtype(&self) -> DataType {
        self.tensor.dtype
    }

    pub fn device(&self) -> Device {
        self.tensor.device
    }

    pub fn numel(&self) -> i64 {
        self.shape().iter().product::<i64>().max(0)
    }

    /// The raw element bytes; requires CPU storage without strides.
    pub fn data_bytes(&self) -> Result<&[u8]> {
        crate::ensure!(
            self.tensor.device.device_type == crate::value::device_type::CPU
                && self.tensor.strides.is_null(),
            ValueError,
            "Only CPU tensor without strides is supported"
        );
        let len = self.numel() as usize * self.tensor.dtype.size();
        let base = unsafe { (self.tensor.data as *const u8).add(self.tensor.byte_offset as usize) };
        Ok(unsafe { std::slice::from_raw_parts(base, len) })
    }

    /// Encode into the byte form described in the module docs.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let data = self.data_bytes()?;
        let shape = self.shape();
        let dtype = self.tensor.dtype;
        let mut out = Vec::with_capacity(16 + 8 * shape.len() + data.len());
        out.extend_from_slice(&TENSOR_MAGIC.to_le_bytes());
        out.extend_from_slice(&(shape.len() as u32).to_le_bytes());
        out.push(dtype.code);
        out.push(dtype.bits);
        out.extend_from_slice(&dtype.lanes.to_le_bytes());
        for dim in shape {
            out.extend_from_slice(&dim.to_le_bytes());
        }
        write_data_le(&mut out, data, dtype.size());
        Ok(out)
    }

    pub fn to_base64(&self) -> Result<String> {
        Ok(BASE64.encode(self.to_bytes()?))
    }
}

#[cfg(target_endian = "big")]
fn write_data_le(out: &mut Vec<u8>, data: &[u8], elem_size: usize) {
    if elem_size <= 1 {
        out.extend_from_slice(data);
        return;
    }
    for elem in data.chunks_exact(elem_size) {
        out.extend(elem.iter().rev());
    }
}

#[cfg(target_endian = "little")]
fn write_data_le(out: &mut Vec<u8>, data: &[u8], _elem_size: usize) {
    out.extend_from_slice(data);
}

struct ByteReader<'a> {
    data: &'a [u8],
    head: usize,
}

impl<'a> ByteReader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        crate::ensure!(self.head + n <= self.data.len(), ValueError, "Unexpected EOF in buffer");
        let out = &self.data[self.head..self.head + n];
        self.head += n;
        Ok(out)
    }

    fn u64_le(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn u32_le(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn i64_le(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }
}

/// Strong handle to a [`TensorObj`].
#[repr(transparent)]
#[derive(Clone)]
pub struct Tensor {
    obj: Ref<TensorObj>,
}

impl Tensor {
    pub fn from_parts(shape: Vec<i64>, dtype: DataType, data: Vec<u8>) -> Result<Tensor> {
        Ok(Tensor { obj: TensorObj::from_parts(shape, dtype, data)? })
    }

    /// Decode the byte form produced by [`TensorObj::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Tensor> {
        let mut reader = ByteReader { data: bytes, head: 0 };
        let magic = reader.u64_le()?;
        crate::ensure!(magic == TENSOR_MAGIC, ValueError, "Magic number mismatch");
        let ndim = reader.u32_le()? as usize;
        let code = reader.take(1)?[0];
        let bits = reader.take(1)?[0];
        let lanes = u16::from_le_bytes(reader.take(2)?.try_into().unwrap());
        let dtype = DataType::new(code, bits, lanes);
        let mut shape = Vec::with_capacity(ndim);
        for _ in 0..ndim {
            shape.push(reader.i64_le()?);
        }
        let numel: i64 = shape.iter().product::<i64>().max(0);
        let data = reader.take(numel as usize * dtype.size())?;
        let data = read_data_le(data, dtype.size());
        Tensor::from_parts(shape, dtype, data)
    }

    pub fn from_base64(text: &str) -> Result<Tensor> {
        let bytes = BASE64
            .decode(text.trim())
            .map_err(|e| crate::rt_err!(ValueError, "Invalid base64 tensor payload: {}", e))?;
        Tensor::from_bytes(&bytes)
    }

    pub(crate) fn from_obj(obj: Ref<TensorObj>) -> Tensor {
        debug_assert!(!obj.is_null());
        Tensor { obj }
    }

    pub fn obj(&self) -> &Ref<TensorObj> {
        &self.obj
    }
}

#[cfg(target_endian = "big")]
fn read_data_le(data: &[u8], elem_size: usize) -> Vec<u8> {
    if elem_size <= 1 {
        return data.to_vec();
    }
    let mut out = Vec::with_capacity(data.len());
    for elem in data.chunks_exact(elem_size) {
        out.extend(elem.iter().rev());
    }
    out
}

#[cfg(target_endian = "little")]
fn read_data_le(data: &[u8], _elem_size: usize) -> Vec<u8> {
    data.to_vec()
}

impl Deref for Tensor {
    type Target = TensorObj;
    fn deref(&self) -> &TensorObj {
        &self.obj
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tensor(shape={:?}, dtype={}, device={})", self.shape(), self.dtype(), self.device())
    }
}

impl From<Tensor> for Any {
    fn from(tensor: Tensor) -> Any {
        Any::from(tensor.obj)
    }
}

impl From<&Tensor> for Any {
    fn from(tensor: &Tensor) -> Any {
        Any::from(tensor.obj.clone())
    }
}

impl TryFromAny for Tensor {
    fn try_from_any(raw: &AnyRaw) -> Result<Tensor> {
        if raw.type_index == ty::TENSOR {
            let obj = unsafe { Ref::from_raw(raw.obj_ptr() as *mut TensorObj) };
            Ok(Tensor::from_obj(obj))
        } else {
            Err(conversion_error(raw, &Tensor::type_str()))
        }
    }
}

impl TypeNamed for Tensor {
    fn type_str() -> String {
        "object.Tensor".to_string()
    }
}
