//! Language/locale resolver
//!
//! Maps a language-mode flag to the fixed set of user-facing strings the
//! task orchestrator and session layer hand back on success and failure.
//! Exactly two modes are supported; anything else is a configuration error
//! rather than a silent default.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    English,
    Chinese,
}

/// The fixed user-visible string set consumed by the orchestrator and the
/// session layer. Every public operation that swallows an error returns one
/// of these instead of raising.
#[derive(Debug, Clone, Copy)]
pub struct LocaleStrings {
    /// Returned whenever a bounded-retry block exhausts its budget.
    pub timeout: &'static str,
    /// Preamble inserted between context and the user's question.
    pub question_ask: &'static str,
    /// Instruction appended to assistant prompts fixing the answer language.
    pub answer_language: &'static str,
    /// Catch-all for the data-analysis flow.
    pub analysis_failed: &'static str,
    /// Catch-all for the report-generation flow.
    pub report_failed: &'static str,
    /// Budget exhaustion in the analysis flow.
    pub cannot_answer: &'static str,
    /// The chart-list fetch reported failure in the delete flow.
    pub fetch_data_failed: &'static str,
    /// No deletable chart could be determined, or deletion itself failed.
    pub delete_chart_failed: &'static str,
    /// A table was submitted without usable annotations.
    pub missing_annotation: &'static str,
    /// The completion credentials did not pass the probe.
    pub bad_api_key: &'static str,
    /// Report-mode sessions reject non-report questions with this.
    pub report_questions_only: &'static str,
    /// Inbound envelope carried an unknown state code.
    pub status_code_error: &'static str,
    /// Inbound envelope could not be parsed at all.
    pub bad_envelope: &'static str,
    /// API-key probe outcomes for the test chat type.
    pub test_pass: &'static str,
    pub test_fail: &'static str,
    pub key_not_saved: &'static str,
    /// Opening line of the annotation-check conversation.
    pub check_annotation_ask: &'static str,
    /// Opening question of the schema-description conversation.
    pub describe_data_ask: &'static str,
}

static ENGLISH: LocaleStrings = LocaleStrings {
    timeout: "Sorry, this AI-GPT interface call timed out, please try again.",
    question_ask: " This is my question: ",
    answer_language: "Answer questions in English.",
    analysis_failed: "Failed to analyze data, please check whether the relevant data is sufficient.",
    report_failed: "Report generation failed, please check whether the relevant data is sufficient.",
    cannot_answer: "Sorry, we cannot answer your question. Please check whether the relevant data is sufficient.",
    fetch_data_failed: "Failed to fetch data, please check whether the relevant data is sufficient.",
    delete_chart_failed: "Failed to delete chart. Please check if the provided chart list format is correct and if the chart name exists.",
    missing_annotation: "Missing database annotation",
    bad_api_key: "The ApiKey setting is incorrect, please modify it!",
    report_questions_only: "Sorry, this conversation only deals with report generation issues. Please ask this question in the data analysis conversation.",
    status_code_error: "Status code error",
    bad_envelope: "Abnormal data format",
    test_pass: "test success",
    test_fail: "test fail",
    key_not_saved: "apikey not detected, please save first",
    check_annotation_ask: "Help me check that the following data comments are complete and correct.",
    describe_data_ask: "Please explain this data to me.",
};

static CHINESE: LocaleStrings = LocaleStrings {
    timeout: "十分抱歉，本次AI-GPT接口调用超时，请再次重试",
    question_ask: " 以下是我的问题，请用中文回答: ",
    answer_language: "用中文回答问题.",
    analysis_failed: "分析数据失败，请检查相关数据是否充分",
    report_failed: "报表生成失败，请检查相关数据是否充分。",
    cannot_answer: "十分抱歉，无法回答您的问题，请检查相关数据是否充分。",
    fetch_data_failed: "获取数据失败，请检查相关数据是否充分。",
    delete_chart_failed: "删除图表失败。 请检查提供的图表列表格式是否正确以及图表名称是否存在。",
    missing_annotation: "缺少数据库注释",
    bad_api_key: "ApiKey设置有误,请修改!",
    report_questions_only: "非常抱歉，本对话只处理报表生成类问题，这个问题请您到数据分析对话中提问",
    status_code_error: "状态码错误",
    bad_envelope: "数据格式异常",
    test_pass: "检测通过",
    test_fail: "检测未通过...",
    key_not_saved: "未检测到apikey,请先保存",
    check_annotation_ask: "帮助我检查下列数据注释是否完整且正确: ",
    describe_data_ask: "请为我解释一下这些数据",
};

impl Locale {
    /// Resolve a configured language mode. Unknown modes fail fast instead
    /// of defaulting, so a typo in configuration surfaces immediately.
    pub fn resolve(mode: &str) -> Result<Self> {
        match mode.trim().to_ascii_lowercase().as_str() {
            "en" | "english" => Ok(Locale::English),
            "cn" | "zh" | "chinese" => Ok(Locale::Chinese),
            other => Err(Error::Configuration(format!(
                "unknown language mode '{other}', expected 'english' or 'chinese'"
            ))),
        }
    }

    pub fn strings(&self) -> &'static LocaleStrings {
        match self {
            Locale::English => &ENGLISH,
            Locale::Chinese => &CHINESE,
        }
    }

    /// Message for an annotation payload that exceeds the token ceiling.
    pub fn oversize_message(&self, tokens: usize, ceiling: usize) -> String {
        match self {
            Locale::English => format!(
                "The selected table length {tokens} ,  exceeds the maximum length: {ceiling} , please select again"
            ),
            Locale::Chinese => {
                format!("所选表格{tokens} , 超过了最大长度:{ceiling} , 请重新选择")
            }
        }
    }
}

impl Default for Locale {
    fn default() -> Self {
        Locale::English
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_known_modes() {
        assert_eq!(Locale::resolve("english").unwrap(), Locale::English);
        assert_eq!(Locale::resolve("EN").unwrap(), Locale::English);
        assert_eq!(Locale::resolve("chinese").unwrap(), Locale::Chinese);
        assert_eq!(Locale::resolve("zh").unwrap(), Locale::Chinese);
    }

    #[test]
    fn unknown_mode_is_a_configuration_error() {
        let err = Locale::resolve("klingon").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert!(err.to_string().contains("klingon"));
    }

    #[test]
    fn string_sets_differ_by_locale() {
        assert_ne!(
            Locale::English.strings().timeout,
            Locale::Chinese.strings().timeout
        );
        assert!(Locale::Chinese.strings().timeout.contains("超时"));
        assert!(Locale::English.strings().status_code_error.contains("Status"));
    }

    #[test]
    fn oversize_message_carries_both_numbers() {
        let msg = Locale::English.oversize_message(18000, 16000);
        assert!(msg.contains("18000"));
        assert!(msg.contains("16000"));
    }
}
