//! Array schema: dimensions, attributes, orders and filter pipelines.

use std::sync::Arc;

use lattice_common::{error::Error, Result};

use crate::coord::CoordType;
use crate::domain::Domain;
use crate::dtype::{CellOrder, Datatype, CELL_VAR_OFFSET_SIZE};
use crate::filter::{EncryptionKey, FilterPipeline};
use crate::fragment::FragmentMetadata;

/// Reserved attribute name under which coordinates are read.
pub const COORDS: &str = "__coords";

/// One named attribute of the array.
#[derive(Debug, Clone)]
pub struct Attribute {
    pub name: String,
    pub datatype: Datatype,
    pub var_sized: bool,
    pub filters: FilterPipeline,
}

impl Attribute {
    pub fn new(name: impl Into<String>, datatype: Datatype) -> Attribute {
        Attribute {
            name: name.into(),
            datatype,
            var_sized: false,
            filters: FilterPipeline::new(),
        }
    }

    pub fn var_sized(mut self) -> Attribute {
        self.var_sized = true;
        self
    }

    pub fn with_filters(mut self, filters: FilterPipeline) -> Attribute {
        self.filters = filters;
        self
    }
}

/// Schema of a multi-dimensional array.
#[derive(Debug, Clone)]
pub struct ArraySchema<T> {
    domain: Domain<T>,
    dense: bool,
    /// Cells per sparse tile.
    capacity: u64,
    attributes: Vec<Attribute>,
    coords_filters: FilterPipeline,
    offsets_filters: FilterPipeline,
}

impl<T: CoordType> ArraySchema<T> {
    pub fn dense(domain: Domain<T>, attributes: Vec<Attribute>) -> Result<ArraySchema<T>> {
        if T::is_real() {
            return Err(Error::type_mismatch(
                "dense arrays require an integer domain",
            ));
        }
        if domain.tile_extents().is_none() {
            return Err(Error::reader_state("dense arrays require tile extents"));
        }
        Ok(ArraySchema {
            domain,
            dense: true,
            capacity: 0,
            attributes,
            coords_filters: FilterPipeline::new(),
            offsets_filters: FilterPipeline::new(),
        })
    }

    pub fn sparse(
        domain: Domain<T>,
        capacity: u64,
        attributes: Vec<Attribute>,
    ) -> Result<ArraySchema<T>> {
        if capacity == 0 {
            return Err(Error::reader_state("sparse tile capacity must be positive"));
        }
        Ok(ArraySchema {
            domain,
            dense: false,
            capacity,
            attributes,
            coords_filters: FilterPipeline::new(),
            offsets_filters: FilterPipeline::new(),
        })
    }

    pub fn with_coords_filters(mut self, filters: FilterPipeline) -> ArraySchema<T> {
        self.coords_filters = filters;
        self
    }

    pub fn with_offsets_filters(mut self, filters: FilterPipeline) -> ArraySchema<T> {
        self.offsets_filters = filters;
        self
    }

    pub fn domain(&self) -> &Domain<T> {
        &self.domain
    }

    pub fn is_dense(&self) -> bool {
        self.dense
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn dim_num(&self) -> usize {
        self.domain.dim_num()
    }

    pub fn cell_order(&self) -> CellOrder {
        self.domain.cell_order()
    }

    pub fn coords_datatype(&self) -> Datatype {
        T::DATATYPE
    }

    /// Size in bytes of one coordinate tuple.
    pub fn coords_size(&self) -> u64 {
        self.dim_num() as u64 * T::DATATYPE.size()
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn is_attribute(&self, name: &str) -> bool {
        name == COORDS || self.attribute(name).is_some()
    }

    /// Whether `name` is variable-sized; coordinates never are.
    pub fn var_size(&self, name: &str) -> Result<bool> {
        if name == COORDS {
            return Ok(false);
        }
        self.attribute(name)
            .map(|a| a.var_sized)
            .ok_or_else(|| Error::invalid_attribute(name))
    }

    pub fn datatype(&self, name: &str) -> Result<Datatype> {
        if name == COORDS {
            return Ok(T::DATATYPE);
        }
        self.attribute(name)
            .map(|a| a.datatype)
            .ok_or_else(|| Error::invalid_attribute(name))
    }

    /// Bytes per cell in the fixed stream of `name`: the coordinate tuple
    /// size for coordinates, the offset entry size for var attributes.
    pub fn cell_size(&self, name: &str) -> Result<u64> {
        if name == COORDS {
            return Ok(self.coords_size());
        }
        let attr = self
            .attribute(name)
            .ok_or_else(|| Error::invalid_attribute(name))?;
        if attr.var_sized {
            Ok(CELL_VAR_OFFSET_SIZE)
        } else {
            Ok(attr.datatype.size())
        }
    }

    /// Filter pipeline of the given stream.
    pub fn filters(&self, name: &str) -> Result<&FilterPipeline> {
        if name == COORDS {
            return Ok(&self.coords_filters);
        }
        self.attribute(name)
            .map(|a| &a.filters)
            .ok_or_else(|| Error::invalid_attribute(name))
    }

    pub fn offsets_filters(&self) -> &FilterPipeline {
        &self.offsets_filters
    }
}

/// An opened array: schema, fragment stack, encryption key.
#[derive(Clone)]
pub struct Array<T> {
    pub schema: Arc<ArraySchema<T>>,
    pub fragments: Vec<Arc<FragmentMetadata<T>>>,
    pub encryption_key: EncryptionKey,
}
