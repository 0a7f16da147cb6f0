//! 路由：检查最新助手条目，决定结束本轮还是进入工具调度
//!
//! 纯函数，无副作用、无外部调用。

use crate::memory::Entry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Terminate,
    Dispatch,
}

/// 有工具调用即 Dispatch，否则 Terminate
pub fn route(latest: &Entry) -> Route {
    if latest.has_tool_calls() {
        Route::Dispatch
    } else {
        Route::Terminate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::ToolCall;

    #[test]
    fn test_route() {
        assert_eq!(route(&Entry::assistant("done")), Route::Terminate);
        let with_call = Entry::assistant_with_calls(
            "let me check",
            vec![ToolCall::new("1", "detect", serde_json::json!({}))],
        );
        assert_eq!(route(&with_call), Route::Dispatch);
    }
}
