use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AggregatorError {
    #[error("模型输出中没有 JSON 文档")]
    MissingDocument,
    #[error("模型输出的 JSON 文档无法解析: {0}")]
    InvalidDocument(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    AwaitingJson,
    Accumulating,
}

/// 把模型输出切成两段：第一个 { 出现之前是叙述文本，逐段实时下发；
/// 之后静默累积，流结束时一次性解析
///
/// 模型先用文字"思考"再给 JSON 只是习惯不是协议，所以不做流式 JSON
/// 解析，只认整段结果。叙述文本里出现字面 { 会提前切换阶段并让提取
/// 起点前移，这是沿用的已知脆弱点。
#[derive(Debug, Default)]
pub struct StreamAggregator {
    buffer: String,
    phase: Phase,
}

impl Default for Phase {
    fn default() -> Self {
        Phase::AwaitingJson
    }
}

impl StreamAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一段增量；返回 Some 表示这段应原样转发给调用方
    ///
    /// 带来第一个 { 的那段增量不再转发。
    pub fn push(&mut self, delta: &str) -> Option<String> {
        self.buffer.push_str(delta);
        match self.phase {
            Phase::AwaitingJson => {
                if self.buffer.contains('{') {
                    self.phase = Phase::Accumulating;
                    None
                } else if delta.is_empty() {
                    None
                } else {
                    Some(delta.to_string())
                }
            }
            Phase::Accumulating => None,
        }
    }

    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    /// 流结束后取第一个 { 到最后一个 } 的区域整体解析，取不到或
    /// 解析失败对本次请求是致命错误
    pub fn finish(self) -> Result<Value, AggregatorError> {
        let start = self.buffer.find('{').ok_or(AggregatorError::MissingDocument)?;
        let end = self.buffer.rfind('}').ok_or(AggregatorError::MissingDocument)?;
        if end < start {
            return Err(AggregatorError::MissingDocument);
        }
        Ok(serde_json::from_str(&self.buffer[start..=end])?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_prose_deltas_are_forwarded_verbatim() {
        let mut agg = StreamAggregator::new();
        assert_eq!(agg.push("Looking at your "), Some("Looking at your ".into()));
        assert_eq!(agg.push("spending habits... "), Some("spending habits... ".into()));
        assert_eq!(agg.buffer(), "Looking at your spending habits... ");
    }

    #[test]
    fn test_forwarding_stops_at_first_brace() {
        let mut agg = StreamAggregator::new();
        assert!(agg.push("here is the layout: ").is_some());
        // 带来第一个 { 的增量不再转发
        assert_eq!(agg.push("{\"widgets\""), None);
        assert_eq!(agg.push(": []}"), None);
    }

    #[test]
    fn test_final_document_matches_direct_parse() {
        let deltas = ["Let me think. ", "Done: ", "{\"widgets\": [", "{\"kind\": \"balance\"}", "]}"];
        let mut agg = StreamAggregator::new();
        let mut forwarded = Vec::new();
        for delta in deltas {
            if let Some(text) = agg.push(delta) {
                forwarded.push(text);
            }
        }
        assert_eq!(forwarded, ["Let me think. ", "Done: "]);

        let concatenated: String = deltas.concat();
        let start = concatenated.find('{').unwrap();
        let end = concatenated.rfind('}').unwrap();
        let direct: Value = serde_json::from_str(&concatenated[start..=end]).unwrap();
        assert_eq!(agg.finish().unwrap(), direct);
    }

    #[test]
    fn test_json_only_stream_forwards_nothing() {
        let mut agg = StreamAggregator::new();
        assert_eq!(agg.push("{\"a\": 1}"), None);
        assert_eq!(agg.finish().unwrap(), json!({"a": 1}));
    }

    #[test]
    fn test_missing_document_is_fatal() {
        let mut agg = StreamAggregator::new();
        agg.push("only prose, no structure");
        assert!(matches!(
            agg.finish(),
            Err(AggregatorError::MissingDocument)
        ));
    }

    #[test]
    fn test_garbled_document_is_fatal() {
        let mut agg = StreamAggregator::new();
        agg.push("{\"widgets\": [unterminated}");
        assert!(matches!(
            agg.finish(),
            Err(AggregatorError::InvalidDocument(_))
        ));
    }

    #[test]
    fn test_nested_braces_survive_greedy_extraction() {
        let mut agg = StreamAggregator::new();
        agg.push("prefix {\"outer\": {\"inner\": 2}} ");
        assert_eq!(agg.finish().unwrap(), json!({"outer": {"inner": 2}}));
    }

    #[test]
    fn test_literal_brace_in_prose_shifts_extraction() {
        // 叙述里出现字面 { 时提取起点前移，解析随之失败——
        // 记录现状，属于已知脆弱行为
        let mut agg = StreamAggregator::new();
        agg.push("for example {not json} then ");
        agg.push("{\"widgets\": []}");
        assert!(agg.finish().is_err());
    }

    #[test]
    fn test_empty_delta_is_not_forwarded() {
        let mut agg = StreamAggregator::new();
        assert_eq!(agg.push(""), None);
    }
}
