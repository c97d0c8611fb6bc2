//! # 换行分帧 JSON 编解码
//!
//! ## 设计动机（Why）
//! - TCP 通道在一条字节流上复用多个在途调用，每帧携带 `call_id` 以便读任务分发；
//! - 帧以 JSON 编码并以 `\n` 结尾：JSON 字符串中的换行总会被转义，因此换行可安全作为分隔符。
//!
//! ## 契约说明（What）
//! - [`encode_frame`]：输出包含结尾换行符，超出 `max_frame_bytes` 返回 [`TransportError::Codec`]；
//! - [`decode_frame`]：输入为不含换行符的一行文本，同样校验长度上限；
//! - [`read_frame`]：从字节流读取一帧，累计长度在遇到换行符之前越过上限即返回
//!   [`TransportError::Codec`]，不会无限缓存未终结的行。

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::{Message, Result, TransportError};

const NEWLINE: u8 = b'\n';

/// 线路帧。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// 客户端发起的调用。
    Request {
        call_id: u64,
        streaming: bool,
        message: Message,
    },
    /// 服务端的一条响应。
    Response { call_id: u64, message: Message },
    /// 服务端报告调用失败，调用随之结束。
    Error { call_id: u64, detail: String },
    /// 服务端报告流正常结束。
    End { call_id: u64 },
}

impl Frame {
    /// 帧所属调用。
    pub fn call_id(&self) -> u64 {
        match self {
            Frame::Request { call_id, .. }
            | Frame::Response { call_id, .. }
            | Frame::Error { call_id, .. }
            | Frame::End { call_id } => *call_id,
        }
    }
}

/// 编码一帧（含结尾换行符）。
pub fn encode_frame(frame: &Frame, max_frame_bytes: usize) -> Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec(frame).map_err(|err| TransportError::codec(err.to_string()))?;
    let required = bytes.len() + 1;
    if required > max_frame_bytes {
        return Err(TransportError::codec(format!(
            "frame length {required} exceeds limit {max_frame_bytes}"
        )));
    }
    bytes.push(NEWLINE);
    Ok(bytes)
}

/// 解码一行帧文本。
pub fn decode_frame(line: &str, max_frame_bytes: usize) -> Result<Frame> {
    let required = line.len() + 1;
    if required > max_frame_bytes {
        return Err(TransportError::codec(format!(
            "frame length {required} exceeds limit {max_frame_bytes}"
        )));
    }
    serde_json::from_str(line).map_err(|err| TransportError::codec(err.to_string()))
}

/// 从缓冲读端读取并解码下一帧。
///
/// # 教案式注释
/// - **契约 (What)**：
///   - 干净的 EOF（行首处）返回 `Ok(None)`；
///   - 行内 EOF 或 IO 失败返回 [`TransportError::Stream`]；
///   - 当前行长度（含换行符）超过 `max_frame_bytes` 时立即返回 [`TransportError::Codec`]，
///     无论换行符是否已经到达；
/// - **执行 (How)**：逐块 `fill_buf`，只把换行符之前的部分拷入 `line`，并按实际消费量 `consume`。
pub async fn read_frame<R>(
    reader: &mut R,
    line: &mut Vec<u8>,
    max_frame_bytes: usize,
) -> Result<Option<Frame>>
where
    R: AsyncBufRead + Unpin,
{
    line.clear();
    loop {
        let available = reader
            .fill_buf()
            .await
            .map_err(|err| TransportError::stream(err.to_string()))?;
        if available.is_empty() {
            if line.is_empty() {
                return Ok(None);
            }
            return Err(TransportError::stream("connection closed mid-frame"));
        }
        let newline = available.iter().position(|byte| *byte == NEWLINE);
        let chunk = match newline {
            Some(end) => &available[..end],
            None => available,
        };
        let required = line.len() + chunk.len() + 1;
        if required > max_frame_bytes {
            return Err(TransportError::codec(format!(
                "frame length {required} exceeds limit {max_frame_bytes} before newline"
            )));
        }
        line.extend_from_slice(chunk);
        let consumed = chunk.len() + usize::from(newline.is_some());
        reader.consume(consumed);
        if newline.is_some() {
            let text = std::str::from_utf8(line)
                .map_err(|err| TransportError::codec(err.to_string()))?;
            return decode_frame(text, max_frame_bytes).map(Some);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn encoded_frame_is_single_line() {
        let frame = Frame::Response {
            call_id: 7,
            message: Message::new("Result", json!({ "text": "a\nb" })),
        };
        let bytes = encode_frame(&frame, 1024).expect("encode");
        assert_eq!(bytes.iter().filter(|b| **b == NEWLINE).count(), 1);
        assert_eq!(bytes.last(), Some(&NEWLINE));

        let line = std::str::from_utf8(&bytes[..bytes.len() - 1]).expect("utf8");
        assert_eq!(decode_frame(line, 1024), Ok(frame));
    }

    #[test]
    fn oversized_frames_are_rejected() {
        let frame = Frame::End { call_id: 1 };
        assert!(matches!(encode_frame(&frame, 4), Err(TransportError::Codec { .. })));
        assert!(matches!(
            decode_frame(r#"{"type":"end","call_id":1}"#, 4),
            Err(TransportError::Codec { .. })
        ));
    }

    #[tokio::test]
    async fn reader_yields_frames_then_clean_eof() {
        let mut wire = encode_frame(&Frame::End { call_id: 1 }, 1024).expect("encode");
        wire.extend(encode_frame(&Frame::End { call_id: 2 }, 1024).expect("encode"));
        let mut reader = wire.as_slice();
        let mut line = Vec::new();
        assert_eq!(
            read_frame(&mut reader, &mut line, 1024).await,
            Ok(Some(Frame::End { call_id: 1 }))
        );
        assert_eq!(
            read_frame(&mut reader, &mut line, 1024).await,
            Ok(Some(Frame::End { call_id: 2 }))
        );
        assert_eq!(read_frame(&mut reader, &mut line, 1024).await, Ok(None));
    }

    #[tokio::test]
    async fn unterminated_line_is_rejected_at_the_limit() {
        let wire = vec![b'x'; 4096];
        let mut reader = wire.as_slice();
        let mut line = Vec::new();
        assert!(matches!(
            read_frame(&mut reader, &mut line, 64).await,
            Err(TransportError::Codec { .. })
        ));
        assert!(line.len() < 64);
    }

    #[tokio::test]
    async fn eof_inside_a_frame_is_a_stream_error() {
        let mut reader: &[u8] = br#"{"type":"end""#;
        let mut line = Vec::new();
        assert!(matches!(
            read_frame(&mut reader, &mut line, 1024).await,
            Err(TransportError::Stream { .. })
        ));
    }

    #[test]
    fn malformed_json_is_codec_error() {
        assert!(matches!(decode_frame("{not json", 1024), Err(TransportError::Codec { .. })));
    }
}
