//! Buffer profile resolution for a (port, PG or queue range) binding.

use super::threshold::{
    generic_static_threshold, nvidia_static_threshold, parse_dynamic_th, NvidiaInputs,
    ThresholdFormula,
};
use crate::client::{
    bare_reference, qualify_reference, AsicContext, BufferScheme, BufferTableKind, ConfigDbClient,
};
use crate::error::{QosError, QosResult};
use crate::tables::{
    self, buffer_binding_fields, buffer_pool_fields, buffer_profile_fields, profile_list_fields,
};
use serde::Serialize;
use sonic_qos_common::{DbId, FieldValues};
use tracing::{debug, info, warn};

/// Images on this release line store no pool object ids in COUNTERS_DB.
const LEGACY_OS_MARKER: &str = "201811";

/// A buffer profile as seen by the traffic runner.
///
/// Raw store attributes are kept verbatim in `fields`; everything the
/// resolver derives lives in typed fields next to them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BufferProfile {
    /// Full store key of the profile (`BUFFER_PROFILE_TABLE:<name>`).
    #[serde(rename = "profileName")]
    pub profile_name: String,
    #[serde(flatten)]
    pub fields: FieldValues,
    /// Static threshold in bytes, configured or computed from `dynamic_th`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub static_th: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pg_q_alpha: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port_alpha: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool_size: Option<u64>,
    #[serde(rename = "bufferPoolVoid", skip_serializing_if = "Option::is_none")]
    pub pool_void: Option<String>,
    #[serde(rename = "bufferPoolRoid", skip_serializing_if = "Option::is_none")]
    pub pool_roid: Option<String>,
    /// Single lossy queue under test on ports without lossless queues.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lossy_queue: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lossy_dscp: Option<String>,
}

impl BufferProfile {
    /// Builds a profile from its store attributes.
    ///
    /// A configured `static_th` attribute is lifted into the typed field.
    pub fn from_fields(profile_name: impl Into<String>, mut fields: FieldValues) -> QosResult<Self> {
        let profile_name = profile_name.into();
        let static_th = match fields.remove(buffer_profile_fields::STATIC_TH) {
            Some(v) => Some(v.trim().parse::<u64>().map_err(|_| {
                QosError::buffer_resolution(&profile_name, format!("static_th '{}' is not a byte count", v))
            })?),
            None => None,
        };
        Ok(Self {
            profile_name,
            fields,
            static_th,
            pg_q_alpha: None,
            port_alpha: None,
            pool_size: None,
            pool_void: None,
            pool_roid: None,
            lossy_queue: None,
            lossy_dscp: None,
        })
    }

    /// Zero-valued stand-in for a port/group with nothing bound.
    pub fn placeholder(profile_prefix: &str) -> Self {
        let fields = [
            (buffer_profile_fields::POOL, tables::INGRESS_LOSSLESS_POOL),
            (buffer_profile_fields::XON, "0"),
            (buffer_profile_fields::XOFF, "0"),
            (buffer_profile_fields::SIZE, "0"),
            (buffer_profile_fields::DYNAMIC_TH, "0"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        Self {
            profile_name: format!("{}pg_lossless_0_0m_profile", profile_prefix),
            fields,
            static_th: Some(0),
            pg_q_alpha: Some(0.0),
            port_alpha: Some(0.0),
            pool_size: Some(0),
            pool_void: None,
            pool_roid: None,
            lossy_queue: None,
            lossy_dscp: None,
        }
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub fn pool(&self) -> QosResult<&str> {
        self.field(buffer_profile_fields::POOL).ok_or_else(|| {
            QosError::buffer_resolution(&self.profile_name, "profile has no pool")
        })
    }

    pub fn size(&self) -> QosResult<u64> {
        let raw = self.field(buffer_profile_fields::SIZE).ok_or_else(|| {
            QosError::buffer_resolution(&self.profile_name, "profile has no size")
        })?;
        parse_bytes(&self.profile_name, raw)
    }

    pub fn dynamic_th(&self) -> Option<&str> {
        self.field(buffer_profile_fields::DYNAMIC_TH)
    }

    pub fn is_lossless(&self) -> bool {
        self.profile_name.contains("pg_lossless")
    }
}

fn parse_bytes(key: &str, raw: &str) -> QosResult<u64> {
    raw.trim()
        .parse()
        .map_err(|_| QosError::buffer_resolution(key, format!("'{}' is not a byte count", raw)))
}

/// Resolves the profile bound to `port`/`range` in the PG or queue table.
///
/// Ports with nothing bound get [`BufferProfile::placeholder`] so callers
/// that only need lossless attributes keep working on lossy-only ports.
pub async fn resolve_buffer_profile(
    client: &ConfigDbClient,
    ctx: AsicContext<'_>,
    port: &str,
    range: &str,
    kind: BufferTableKind,
) -> QosResult<BufferProfile> {
    let scheme = client.buffer_scheme().await?;
    let port_key = match kind {
        BufferTableKind::Queue => ctx.queue_port_key(scheme.db.separator(), port),
        BufferTableKind::PriorityGroup => port.to_string(),
    };
    let binding_key = scheme.binding_key(kind, &port_key, range);
    let profile_prefix = scheme.profile_prefix();

    let bound = client
        .get(scheme.db, &binding_key, buffer_binding_fields::PROFILE)
        .await?
        .filter(|v| !v.is_empty());
    let Some(bound) = bound else {
        warn!(
            key = %binding_key,
            "No buffer profile bound, using zero-valued lossless placeholder"
        );
        return Ok(BufferProfile::placeholder(&profile_prefix));
    };

    let profile_name = qualify_reference(&bound, &profile_prefix);
    let fields = client.hgetall(scheme.db, &profile_name).await?;
    if fields.is_empty() {
        return Err(QosError::buffer_resolution(
            &profile_name,
            format!("profile bound at {} does not exist", binding_key),
        ));
    }
    let mut profile = BufferProfile::from_fields(profile_name, fields)?;

    if let Some(dynamic_th) = profile.dynamic_th().map(str::to_string) {
        match ThresholdFormula::for_platform(&ctx.device.platform) {
            ThresholdFormula::Generic => {
                apply_generic_threshold(client, &scheme, &dynamic_th, &mut profile).await?
            }
            ThresholdFormula::NvidiaAlpha => {
                apply_nvidia_threshold(client, kind, &port_key, &dynamic_th, &mut profile).await?
            }
        }
    }

    if profile.is_lossless()
        && (profile.field(buffer_profile_fields::XON).is_none()
            || profile.field(buffer_profile_fields::XOFF).is_none())
    {
        return Err(QosError::config_contract(
            &profile.profile_name,
            "could not find xon and/or xoff values",
        ));
    }

    if !ctx.device.os_version.contains(LEGACY_OS_MARKER) {
        update_pool_object_ids(client, &scheme, &mut profile).await?;
    }

    info!(
        asic = %client.label(),
        key = %binding_key,
        profile = %profile.profile_name,
        static_th = ?profile.static_th,
        "Resolved buffer profile"
    );
    Ok(profile)
}

async fn pool_size(client: &ConfigDbClient, db: DbId, pool_key: &str) -> QosResult<u64> {
    let raw = client
        .get_required(db, pool_key, buffer_pool_fields::SIZE)
        .await?;
    parse_bytes(pool_key, &raw)
}

async fn apply_generic_threshold(
    client: &ConfigDbClient,
    scheme: &BufferScheme,
    dynamic_th: &str,
    profile: &mut BufferProfile,
) -> QosResult<()> {
    let pool_key = qualify_reference(profile.pool()?, &scheme.pool_prefix());
    let pool_size = pool_size(client, scheme.db, &pool_key).await?;
    let size = profile.size()?;
    let static_th = generic_static_threshold(size, parse_dynamic_th(dynamic_th)?, pool_size)
        .ok_or_else(|| {
            QosError::buffer_resolution(
                &profile.profile_name,
                format!("size {} plus pool share overflows a byte count", size),
            )
        })?;
    debug!(profile = %profile.profile_name, pool_size, static_th, "Generic threshold");
    profile.static_th = Some(static_th);
    Ok(())
}

/// Port-level profile list of `port` in APPL_DB.
async fn port_profile_list(
    client: &ConfigDbClient,
    kind: BufferTableKind,
    port_key: &str,
) -> QosResult<Vec<String>> {
    let table = match kind {
        BufferTableKind::Queue => tables::APP_BUFFER_PORT_EGRESS_PROFILE_LIST_TABLE,
        BufferTableKind::PriorityGroup => tables::APP_BUFFER_PORT_INGRESS_PROFILE_LIST_TABLE,
    };
    let key = DbId::ApplDb.key(table, &[port_key]);
    let list = client
        .get(DbId::ApplDb, &key, profile_list_fields::PROFILE_LIST)
        .await?
        .unwrap_or_default();
    Ok(list
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect())
}

async fn apply_nvidia_threshold(
    client: &ConfigDbClient,
    kind: BufferTableKind,
    port_key: &str,
    dynamic_th: &str,
    profile: &mut BufferProfile,
) -> QosResult<()> {
    let entry_pool = profile.pool()?.to_string();
    let mut port_profile = None;
    for name in port_profile_list(client, kind, port_key).await? {
        let key = DbId::ApplDb.key(tables::APP_BUFFER_PROFILE_TABLE, &[&name]);
        let fields = client.hgetall(DbId::ApplDb, &key).await?;
        if fields.get(buffer_profile_fields::POOL) == Some(&entry_pool) {
            port_profile = Some((key, fields));
            break;
        }
    }
    let missing = || QosError::MissingPortProfile {
        port: port_key.to_string(),
        pool: entry_pool.clone(),
    };
    let (port_profile_key, port_fields) = port_profile.ok_or_else(missing)?;
    let port_dynamic_th = port_fields
        .get(buffer_profile_fields::DYNAMIC_TH)
        .filter(|v| !v.is_empty())
        .ok_or_else(missing)?;
    let port_size = port_fields
        .get(buffer_profile_fields::SIZE)
        .ok_or_else(|| QosError::buffer_resolution(&port_profile_key, "port profile has no size"))
        .and_then(|raw| parse_bytes(&port_profile_key, raw))?;

    let pool_key = DbId::ApplDb.key(tables::APP_BUFFER_POOL_TABLE, &[&entry_pool]);
    let pool_size = pool_size(client, DbId::ApplDb, &pool_key).await?;

    let th = nvidia_static_threshold(NvidiaInputs {
        entry_dynamic_th: dynamic_th,
        entry_size: profile.size()?,
        port_dynamic_th,
        port_size,
        pool_size,
    })?;
    debug!(
        profile = %profile.profile_name,
        port_profile = %port_profile_key,
        pool_size,
        static_th = th.static_th,
        "Nvidia threshold"
    );
    profile.static_th = Some(th.static_th);
    profile.pg_q_alpha = Some(th.pg_q_alpha);
    profile.port_alpha = Some(th.port_alpha);
    profile.pool_size = Some(pool_size);
    Ok(())
}

/// Adds the pool's virtual and real object ids.
///
/// The ids only cross-reference telemetry, so a pool missing from the
/// counter name map is logged and left unset.
async fn update_pool_object_ids(
    client: &ConfigDbClient,
    scheme: &BufferScheme,
    profile: &mut BufferProfile,
) -> QosResult<()> {
    let pool_prefix = scheme.pool_prefix();
    let pool = bare_reference(profile.pool()?, &[&pool_prefix]).to_string();

    let Some(void) = client
        .get(DbId::CountersDb, tables::COUNTERS_BUFFER_POOL_NAME_MAP, &pool)
        .await?
    else {
        warn!(pool = %pool, "Buffer pool missing from counters name map");
        return Ok(());
    };
    let roid = client
        .get(DbId::AsicDb, tables::ASIC_VIDTORID, &void)
        .await?
        .map(|r| r.replace("oid:", ""));

    profile.pool_void = Some(void);
    profile.pool_roid = roid;
    Ok(())
}
