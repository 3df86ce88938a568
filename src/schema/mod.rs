//! Module `schema` implement the schema catalog for tags and edge-types.
//!
//! Schemas are versioned: many versions of the same tag/edge schema
//! coexist, the latest version encodes new rows while every older version
//! stays decodable. The [Catalog] is shared-read and rarely written; the
//! meta-service pushes changes through [Catalog::apply], which swaps a
//! copy-on-write snapshot under a latch. Executors take a [View] once per
//! invocation and resolve every schema through it, so a push can never
//! change what a running executor sees.

use std::{collections::BTreeMap, collections::HashMap, sync::Arc};

use crate::{
    expr::{Expr, NullContext},
    types::{SchemaId, SchemaVer, SpaceId, Type},
    util::Latch,
    Error, Result,
};

/// One typed column of a tag or edge schema.
#[derive(Clone, Debug)]
pub struct Column {
    pub name: String,
    pub typ: Type,
    pub nullable: bool,
    pub default: Option<Expr>,
}

impl Column {
    pub fn new(name: &str, typ: Type) -> Column {
        Column {
            name: name.to_string(),
            typ,
            nullable: true,
            default: None,
        }
    }

    pub fn set_nullable(mut self, nullable: bool) -> Column {
        self.nullable = nullable;
        self
    }

    pub fn set_default(mut self, default: Expr) -> Column {
        self.default = Some(default);
        self
    }
}

/// Time-to-live declaration: rows whose `col` anchor plus `duration_secs`
/// lies in the past read as absent.
#[derive(Clone, Debug)]
pub struct Ttl {
    pub col: String,
    pub duration_secs: i64,
}

/// A versioned tag or edge schema: an ordered list of typed columns and
/// an optional TTL.
#[derive(Clone, Debug)]
pub struct Schema {
    id: SchemaId,
    ver: SchemaVer,
    cols: Vec<Column>,
    ttl: Option<Ttl>,
}

impl Schema {
    pub fn new(id: SchemaId, ver: SchemaVer) -> Schema {
        Schema {
            id,
            ver,
            cols: vec![],
            ttl: None,
        }
    }

    pub fn add_column(mut self, col: Column) -> Schema {
        self.cols.push(col);
        self
    }

    pub fn set_ttl(mut self, col: &str, duration_secs: i64) -> Schema {
        self.ttl = Some(Ttl {
            col: col.to_string(),
            duration_secs,
        });
        self
    }

    pub fn to_id(&self) -> SchemaId {
        self.id
    }

    pub fn to_ver(&self) -> SchemaVer {
        self.ver
    }

    pub fn as_cols(&self) -> &[Column] {
        &self.cols
    }

    pub fn as_ttl(&self) -> Option<&Ttl> {
        self.ttl.as_ref()
    }

    pub fn ncols(&self) -> usize {
        self.cols.len()
    }

    /// Position and declaration of column `name`.
    pub fn col(&self, name: &str) -> Option<(usize, &Column)> {
        self.cols
            .iter()
            .enumerate()
            .find(|(_, col)| col.name == name)
    }

    /// Sanity-check this schema before it is published to the catalog.
    pub fn validate(&self) -> Result<()> {
        let mut names: Vec<&str> = self.cols.iter().map(|c| c.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        if names.len() != self.cols.len() {
            err_at!(InvalidInput, msg: "duplicate column in {}/{}", self.id, self.ver)?;
        }
        for col in self.cols.iter() {
            if let Some(default) = &col.default {
                let val = match default.eval(&NullContext) {
                    Ok(val) => val,
                    Err(e) => err_at!(
                        InvalidDefault, msg: "default for {:?}: {}", col.name, e
                    )?,
                };
                if val.clone().coerce_to(col.typ).is_err() {
                    err_at!(
                        InvalidDefault, msg: "default {} for {:?} col", val, col.name
                    )?;
                }
            }
        }
        if let Some(ttl) = &self.ttl {
            match self.col(&ttl.col) {
                Some((_, col)) if col.typ == Type::Int => (),
                Some(_) => err_at!(InvalidInput, msg: "ttl col {:?} not int", ttl.col)?,
                None => err_at!(InvalidInput, msg: "ttl col {:?} missing", ttl.col)?,
            }
            if ttl.duration_secs <= 0 {
                err_at!(InvalidInput, msg: "ttl duration {}", ttl.duration_secs)?;
            }
        }
        Ok(())
    }
}

/// A change pushed by the meta-service, applied atomically by
/// [Catalog::apply].
#[derive(Clone, Debug)]
pub enum Push {
    /// Register a graph-space and its fixed vid-length.
    Space { space: SpaceId, vid_len: usize },
    /// Publish a (new version of a) named schema into a space.
    Schema {
        space: SpaceId,
        name: String,
        schema: Schema,
    },
    /// Drop a schema with all its versions.
    Drop { space: SpaceId, id: SchemaId },
}

#[derive(Clone, Default)]
struct SpaceInfo {
    vid_len: usize,
    schemas: BTreeMap<SchemaId, BTreeMap<SchemaVer, Arc<Schema>>>,
    names: HashMap<SchemaId, String>,
}

/// The schema catalog, shared across executors.
pub struct Catalog {
    spaces: Latch<HashMap<SpaceId, Arc<SpaceInfo>>>,
}

impl Default for Catalog {
    fn default() -> Catalog {
        Catalog::new()
    }
}

impl Catalog {
    pub fn new() -> Catalog {
        Catalog {
            spaces: Latch::new(HashMap::new()),
        }
    }

    /// Apply one meta-service push. The visible state changes atomically;
    /// views taken earlier keep their snapshot.
    pub fn apply(&self, push: Push) -> Result<()> {
        match push {
            Push::Space { space, vid_len } => {
                if vid_len == 0 {
                    err_at!(InvalidInput, msg: "space {} vid_len 0", space)?;
                }
                let mut spaces = self.spaces.write();
                if spaces.contains_key(&space) {
                    err_at!(InvalidInput, msg: "space {} exists", space)?;
                }
                let info = SpaceInfo {
                    vid_len,
                    ..SpaceInfo::default()
                };
                spaces.insert(space, Arc::new(info));
            }
            Push::Schema {
                space,
                name,
                schema,
            } => {
                schema.validate()?;
                log::debug!(
                    target: "catalog",
                    "publish {}/{} ver-{} as {:?}", space, schema.id, schema.ver, name
                );
                let mut spaces = self.spaces.write();
                let info = match spaces.get(&space) {
                    Some(info) => info,
                    None => err_at!(SchemaNotFound, msg: "space {}", space)?,
                };
                let mut info = SpaceInfo::clone(info);
                info.names.insert(schema.id, name);
                info.schemas
                    .entry(schema.id)
                    .or_insert_with(BTreeMap::new)
                    .insert(schema.ver, Arc::new(schema));
                spaces.insert(space, Arc::new(info));
            }
            Push::Drop { space, id } => {
                let mut spaces = self.spaces.write();
                let info = match spaces.get(&space) {
                    Some(info) => info,
                    None => err_at!(SchemaNotFound, msg: "space {}", space)?,
                };
                let mut info = SpaceInfo::clone(info);
                info.schemas.remove(&id);
                info.names.remove(&id);
                spaces.insert(space, Arc::new(info));
            }
        }
        Ok(())
    }

    /// Take an immutable snapshot of `space`. Repeated resolutions through
    /// the returned view observe the same schemas.
    pub fn view(&self, space: SpaceId) -> Result<View> {
        let spaces = self.spaces.read();
        match spaces.get(&space) {
            Some(info) => Ok(View {
                space,
                info: Arc::clone(info),
            }),
            None => err_at!(SchemaNotFound, msg: "space {}", space),
        }
    }

    /// Shorthand for `view(space)?.latest(id)`.
    pub fn latest(&self, space: SpaceId, id: SchemaId) -> Result<Arc<Schema>> {
        self.view(space)?.latest(id)
    }
}

/// Immutable snapshot of one space's schemas.
#[derive(Clone)]
pub struct View {
    space: SpaceId,
    info: Arc<SpaceInfo>,
}

impl View {
    pub fn to_space(&self) -> SpaceId {
        self.space
    }

    pub fn vid_len(&self) -> usize {
        self.info.vid_len
    }

    /// Latest version of schema `id`; the version new rows are encoded
    /// under.
    pub fn latest(&self, id: SchemaId) -> Result<Arc<Schema>> {
        let vers = match self.info.schemas.get(&id) {
            Some(vers) => vers,
            None => err_at!(SchemaNotFound, msg: "{} in space {}", id, self.space)?,
        };
        match vers.values().next_back() {
            Some(schema) => Ok(Arc::clone(schema)),
            None => err_at!(SchemaNotFound, msg: "{} in space {}", id, self.space),
        }
    }

    /// Specific version of schema `id`; used to decode stored rows under
    /// the schema that authored them.
    pub fn by_version(&self, id: SchemaId, ver: SchemaVer) -> Result<Arc<Schema>> {
        match self.info.schemas.get(&id).and_then(|vers| vers.get(&ver)) {
            Some(schema) => Ok(Arc::clone(schema)),
            None => {
                err_at!(SchemaNotFound, msg: "{} ver-{} in space {}", id, ver, self.space)
            }
        }
    }

    /// Human name under which schema `id` was published.
    pub fn name(&self, id: SchemaId) -> Result<String> {
        match self.info.names.get(&id) {
            Some(name) => Ok(name.to_string()),
            None => err_at!(SchemaNotFound, msg: "{} in space {}", id, self.space),
        }
    }
}
