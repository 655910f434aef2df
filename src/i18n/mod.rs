//! 多语言错误消息模块
//!
//! 使用rat_embed_lang框架提供统一的错误消息多语言支持

use std::collections::HashMap;
use rat_embed_lang::{normalize_language_code, register_translations, set_language};

pub use rat_embed_lang::t;

/// 错误消息翻译注册器
pub struct ErrorMessageI18n;

/// 一条消息的三种语言版本
fn entry(zh: &str, en: &str, ja: &str) -> HashMap<String, String> {
    let mut messages = HashMap::new();
    messages.insert("zh-CN".to_string(), zh.to_string());
    messages.insert("en-US".to_string(), en.to_string());
    messages.insert("ja-JP".to_string(), ja.to_string());
    messages
}

impl ErrorMessageI18n {
    /// 注册所有错误消息翻译
    pub fn register_all_translations() {
        let mut translations = HashMap::new();

        // 游标错误
        translations.insert(
            "error.cursor_closed".to_string(),
            entry("游标已关闭", "Cursor has been closed", "カーソルは既に閉じられています"),
        );
        translations.insert(
            "error.cursor_exhausted".to_string(),
            entry(
                "无法在已耗尽或已终止的游标上调用 get_more",
                "Can't call get_more() on a cursor that has been exhausted or killed",
                "使い切られたか終了したカーソルで get_more() は呼び出せません",
            ),
        );
        translations.insert(
            "error.negative_length".to_string(),
            entry("length 不能为负数: {length}", "length must be non-negative: {length}", "length は負にできません: {length}"),
        );
        translations.insert(
            "error.tailable_to_list".to_string(),
            entry(
                "不能对可追加游标调用 to_list",
                "Can't call to_list on tailable cursor",
                "テイラブルカーソルで to_list は呼び出せません",
            ),
        );
        translations.insert(
            "error.cursor_started".to_string(),
            entry(
                "游标已执行查询，无法再修改选项: {option}",
                "Cannot set options after executing query: {option}",
                "クエリ実行後はオプションを変更できません: {option}",
            ),
        );
        translations.insert(
            "error.tailable_unsupported".to_string(),
            entry(
                "当前驱动后端不支持可追加游标",
                "Tailable cursors are not supported by this driver backend",
                "このドライバーバックエンドはテイラブルカーソルをサポートしていません",
            ),
        );

        // 会话错误
        translations.insert(
            "error.session_ended".to_string(),
            entry("会话已结束，无法继续使用", "Cannot use ended session", "終了したセッションは使用できません"),
        );

        // 工作线程错误
        translations.insert(
            "error.worker".to_string(),
            entry("工作线程执行失败: {message}", "Worker thread failed: {message}", "ワーカースレッドの実行に失敗しました: {message}"),
        );

        // 配置错误
        translations.insert(
            "error.config".to_string(),
            entry("配置错误: {message}", "Configuration error: {message}", "設定エラー: {message}"),
        );

        // 连接错误
        translations.insert(
            "error.connection".to_string(),
            entry("数据库连接失败: {message}", "Database connection failed: {message}", "データベース接続に失敗しました: {message}"),
        );

        // 序列化错误
        translations.insert(
            "error.serialization".to_string(),
            entry("数据序列化失败: {message}", "Data serialization failed: {message}", "データシリアライズが失敗しました: {message}"),
        );

        // 注册所有翻译
        register_translations(translations);
    }

    /// 初始化错误消息多语言支持
    pub fn init() {
        Self::register_all_translations();

        // 从环境变量获取语言设置，默认为zh-CN
        let lang = std::env::var("RAT_LANG")
            .or_else(|_| std::env::var("LANG"))
            .unwrap_or_else(|_| "zh-CN".to_string());

        // 标准化语言代码
        let normalized_lang = normalize_language_code(&lang);
        set_language(&normalized_lang);
    }
}

/// 带参数的翻译，`{name}` 形式的占位符会被替换
pub fn tf(key: &str, args: &[(&str, &str)]) -> String {
    let mut message = t(key);
    for (name, value) in args {
        message = message.replace(&format!("{{{}}}", name), value);
    }
    message
}
