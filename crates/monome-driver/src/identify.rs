//! 设备识别
//!
//! 在独占的（尚未分离的）传输上运行，确定协议变体、网格尺寸与光环数量：
//!
//! 1. 枚举描述中的序列号（权威）：必须命中型号表，否则 `UnknownDevice`
//! 2. 从设备路径推断的序列号：命中型号表才采用
//! 3. 旧协议（40h / series）的尺寸直接取自型号表，无需与设备通信
//! 4. mext 发送 `0x00`（能力）、`0x01`（ID）、`0x05`（尺寸）查询，
//!    在超时内等到 ID 与尺寸（grid）或编码器数量（arc）

use crate::error::MonomeError;
use monome_protocol::{
    Bounds, Codec, DeviceModel, GridSize, Inbound, ProtocolCodec, ProtocolVariant, Query,
    SystemReply, match_serial, section,
};
use monome_serial::discovery::serial_from_path;
use monome_serial::{DeviceDescriptor, Transport, TransportError};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// 识别出的设备信息
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceInfo {
    pub path: String,
    pub serial: String,
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
    pub friendly_name: String,
    pub variant: ProtocolVariant,
    /// 物理网格尺寸（arc 为 0x0）
    pub grid: GridSize,
    /// 光环数量（grid 为 0）
    pub rings: u8,
    pub tilt_sensors: u8,
    /// 设备报告的固件版本（若有）
    pub firmware: Option<String>,
}

/// 设备类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceClass {
    Grid,
    Arc,
}

impl DeviceInfo {
    pub fn class(&self) -> DeviceClass {
        if self.grid.is_empty() && self.rings > 0 {
            DeviceClass::Arc
        } else {
            DeviceClass::Grid
        }
    }

    pub fn is_arc(&self) -> bool {
        self.class() == DeviceClass::Arc
    }

    /// 编解码器校验边界（物理坐标）
    pub fn bounds(&self) -> Bounds {
        Bounds {
            grid: self.grid,
            rings: self.rings,
            tilt_sensors: self.tilt_sensors,
        }
    }
}

/// 识别结果；`residual` 是识别阶段读到但尚未构成完整消息的字节
#[derive(Debug)]
pub struct Identified {
    pub info: DeviceInfo,
    pub residual: Vec<u8>,
}

/// 打开传输前根据描述/路径选出型号（用于决定波特率）
pub fn known_model(
    path: &str,
    descriptor: Option<&DeviceDescriptor>,
) -> Result<Option<&'static DeviceModel>, MonomeError> {
    if let Some(serial) = descriptor.and_then(|d| d.serial.as_deref()) {
        return match_serial(serial)
            .map(Some)
            .ok_or_else(|| MonomeError::UnknownDevice(serial.to_string()));
    }
    Ok(serial_from_path(path).and_then(|s| match_serial(&s)))
}

fn known_serial(path: &str, descriptor: Option<&DeviceDescriptor>) -> Option<String> {
    descriptor
        .and_then(|d| d.serial.clone())
        .or_else(|| serial_from_path(path).filter(|s| match_serial(s).is_some()))
}

/// mext 查询收集到的应答
#[derive(Debug, Default)]
struct Replies {
    id: Option<String>,
    grid: Option<GridSize>,
    encoders: u8,
    tilt_sensors: Option<u8>,
    firmware: Option<String>,
}

impl Replies {
    fn absorb(&mut self, reply: SystemReply) {
        match reply {
            SystemReply::Id(id) => self.id = Some(id),
            SystemReply::GridSize { cols, rows } => {
                let size = GridSize::new(cols, rows);
                if !size.is_empty() {
                    self.grid = Some(size);
                }
            },
            SystemReply::Query { section, count } => match section {
                section::ENCODER => self.encoders = count,
                section::TILT => self.tilt_sensors = Some(count),
                _ => {},
            },
            SystemReply::Version(v) => self.firmware = Some(v),
            SystemReply::GridOffset { .. } | SystemReply::TiltActive { .. } => {},
        }
    }

    fn complete(&self, need_id: bool) -> bool {
        (!need_id || self.id.is_some()) && (self.grid.is_some() || self.encoders > 0)
    }
}

/// 识别设备
pub fn identify(
    transport: &mut dyn Transport,
    descriptor: Option<&DeviceDescriptor>,
    timeout: Duration,
) -> Result<Identified, MonomeError> {
    let path = transport.path().to_string();
    let serial = known_serial(&path, descriptor);

    if let Some(serial) = &serial {
        let model =
            match_serial(serial).ok_or_else(|| MonomeError::UnknownDevice(serial.clone()))?;
        if let Some(grid) = model.size {
            debug!("Identified {} as {} from serial {}", path, model.friendly_name, serial);
            return Ok(Identified {
                info: DeviceInfo {
                    path,
                    serial: serial.clone(),
                    vendor_id: descriptor.and_then(|d| d.vendor_id),
                    product_id: descriptor.and_then(|d| d.product_id),
                    friendly_name: model.friendly_name.to_string(),
                    variant: model.variant,
                    grid,
                    rings: 0,
                    tilt_sensors: Bounds::grid(grid).tilt_sensors,
                    firmware: None,
                },
                residual: Vec::new(),
            });
        }
    }

    let (replies, residual) = query_mext(transport, serial.is_none(), timeout)?;
    let serial = match (serial, replies.id.clone()) {
        (_, Some(id)) => id,
        (Some(serial), None) => serial,
        (None, None) => {
            return Err(MonomeError::ProtocolTimeout {
                timeout_ms: timeout.as_millis() as u64,
            });
        },
    };
    let model = match_serial(&serial).ok_or_else(|| MonomeError::UnknownDevice(serial.clone()))?;
    if model.variant != ProtocolVariant::Mext {
        return Err(MonomeError::UnknownDevice(format!(
            "{} answered mext queries but is a {} device",
            serial, model.variant
        )));
    }

    let (grid, rings) = match replies.grid {
        Some(grid) => (grid, 0),
        None => (GridSize::new(0, 0), replies.encoders),
    };
    let is_arc = grid.is_empty();
    debug!(
        "Identified {} as {} ({}, {} rings)",
        path,
        serial,
        if is_arc { "arc" } else { "grid" },
        rings
    );
    Ok(Identified {
        info: DeviceInfo {
            path,
            vendor_id: descriptor.and_then(|d| d.vendor_id),
            product_id: descriptor.and_then(|d| d.product_id),
            friendly_name: if is_arc {
                format!("monome arc {}", rings)
            } else {
                format!("{} {}", model.friendly_name, grid.cell_count())
            },
            serial,
            variant: ProtocolVariant::Mext,
            grid,
            rings,
            tilt_sensors: replies.tilt_sensors.unwrap_or(0),
            firmware: replies.firmware,
        },
        residual,
    })
}

fn query_mext(
    transport: &mut dyn Transport,
    need_id: bool,
    timeout: Duration,
) -> Result<(Replies, Vec<u8>), MonomeError> {
    let mut codec = Codec::new(ProtocolVariant::Mext);
    let mut request = Vec::new();
    for query in [Query::System, Query::Id, Query::GridSize] {
        request.extend_from_slice(&codec.encode_query(query)?);
    }
    transport.write_all(&request)?;

    let deadline = Instant::now() + timeout;
    let mut replies = Replies::default();
    let mut pending = Vec::new();
    let mut buf = [0u8; 256];

    while !replies.complete(need_id) {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(MonomeError::ProtocolTimeout {
                timeout_ms: timeout.as_millis() as u64,
            });
        }
        let n = match transport.read(&mut buf, remaining) {
            Ok(n) => n,
            Err(TransportError::Timeout) => continue,
            Err(e) => return Err(e.into()),
        };
        pending.extend_from_slice(&buf[..n]);
        let decoded = codec.decode_bytes(&pending);
        pending.drain(..decoded.consumed);
        for msg in decoded.messages {
            match msg {
                Inbound::Reply(reply) => {
                    trace!("identify reply: {:?}", reply);
                    replies.absorb(reply);
                },
                Inbound::Event(ev) => trace!("dropping {} during identify", ev),
                Inbound::Ignored(op) => trace!("ignoring opcode 0x{:02X} during identify", op),
            }
        }
    }
    Ok((replies, pending))
}
