//! Evidence policy and prompt construction for grounded answers.

use std::sync::Arc;

use tracing::{debug, info};

use lawqa_core::{AnswerConfig, Generator, Result, RetrievedContext};

use crate::engine::RetrievalService;
use crate::format::dedupe_citations;
use crate::retry::RetryPolicy;

/// Returned when the retrieved context is too thin to answer from.
pub const INSUFFICIENT_INFORMATION: &str =
    "Trong các trích dẫn luật được cung cấp, không có đủ thông tin để trả lời chính xác câu hỏi này.";

/// Returned when the generator produced nothing.
pub const NOT_FOUND: &str =
    "Không tìm thấy đủ thông tin trong các văn bản luật đã được lập chỉ mục để trả lời câu hỏi này.";

/// Appended to a context cut at the length limit.
pub const TRUNCATION_NOTE: &str = "\n… (đã cắt ngắn context do quá dài)";

pub const SYSTEM_PROMPT: &str = "\
Bạn là trợ lý pháp lý tiếng Việt cho lĩnh vực giao thông đường bộ.
Bạn phải trả lời CHÍNH XÁC tuyệt đối dựa trên các đoạn luật được cung cấp trong context.

Quy tắc bắt buộc:
1) Trả lời trực tiếp, ngắn gọn, rõ ràng, dễ hiểu.
2) Nếu liên quan đến mức phạt hoặc nghĩa vụ:
   - Liệt kê rõ theo từng loại đối tượng/phương tiện (nếu có).
   - Ghi rõ khoảng tiền phạt, hình thức xử phạt (nếu context có).
3) Ở cuối câu trả lời, luôn ghi một dòng \"Căn cứ pháp lý: ...\" và liệt kê các căn cứ dạng ngắn gọn
   (điểm ... khoản ... Điều ... Nghị định ...; khoản ... Điều ... Luật ...), không trích nguyên văn.
4) Tuyệt đối KHÔNG bịa thêm điều luật, điều khoản hay mức phạt không xuất hiện trong context.
5) Không đưa lời khuyên pháp lý chủ quan, chỉ diễn giải và hệ thống hóa nội dung từ luật.
6) Nếu trong context KHÔNG có thông tin đủ rõ để trả lời câu hỏi, bạn PHẢI trả lời:
   \"Trong các trích dẫn luật được cung cấp, không có đủ thông tin để trả lời chính xác câu hỏi này.\"
   và KHÔNG được suy luận thêm ngoài nội dung context.
7) Nếu người dùng hỏi ngoài phạm vi giao thông đường bộ, hãy nói rõ rằng hệ thống chỉ được huấn luyện
   trên luật giao thông đường bộ và từ chối trả lời.
";

/// Cut `context` to at most `max_chars` characters, marking the cut.
pub fn truncate_context(context: &str, max_chars: usize) -> String {
    match context.char_indices().nth(max_chars) {
        None => context.to_string(),
        Some((byte, _)) => format!("{}{}", &context[..byte], TRUNCATION_NOTE),
    }
}

/// User prompt: the question, the legal excerpts, and the answer format.
pub fn build_prompt(question: &str, context: &str) -> String {
    format!(
        "Câu hỏi của người dùng:\n{}\n\n\
         Các đoạn luật (trích từ văn bản pháp luật, bạn PHẢI bám sát):\n{}\n\n\
         Yêu cầu:\n\
         - Trước hết hãy trả lời trực tiếp câu hỏi, trình bày mạch lạc, dễ hiểu.\n\
         - Nếu câu hỏi liên quan đến mức phạt, trách nhiệm, nghĩa vụ thì hãy liệt kê rõ theo từng trường hợp liên quan trong context (ví dụ: theo loại xe, đối tượng vi phạm, hành vi...).\n\
         - Ở cuối câu trả lời, thêm một dòng riêng \"Căn cứ pháp lý: ...\" và liệt kê các căn cứ pháp lý dựa trên dòng [Căn cứ: ...] ở đầu mỗi đoạn luật.\n  \
         Ví dụ: nếu thấy \"[Căn cứ: khoản 4 Điều 2 Luật số 35/2024/QH15]\" thì ghi \"khoản 4 Điều 2 Luật số 35/2024/QH15\".\n\
         - Không được viện dẫn bất kỳ căn cứ nào không có trong các đoạn luật ở trên.\n",
        question.trim(),
        context.trim()
    )
}

/// Result of the evidence check on a retrieved context.
#[derive(Debug, Clone, PartialEq)]
pub enum Evidence {
    /// Enough context; already truncated to the length limit.
    Sufficient(RetrievedContext),
    /// Too little context to answer from.
    Insufficient,
}

#[derive(Debug, Clone, Copy)]
pub struct AnswerPolicy {
    pub min_context_chars: usize,
    pub max_context_chars: usize,
}

impl Default for AnswerPolicy {
    fn default() -> Self {
        Self::from(&AnswerConfig::default())
    }
}

impl From<&AnswerConfig> for AnswerPolicy {
    fn from(config: &AnswerConfig) -> Self {
        Self {
            min_context_chars: config.min_context_chars,
            max_context_chars: config.max_context_chars,
        }
    }
}

impl AnswerPolicy {
    pub fn check(&self, retrieved: RetrievedContext) -> Evidence {
        let context = retrieved.context.trim();
        if context.is_empty() || retrieved.context.chars().count() < self.min_context_chars {
            return Evidence::Insufficient;
        }

        Evidence::Sufficient(RetrievedContext {
            context: truncate_context(&retrieved.context, self.max_context_chars),
            citations: dedupe_citations(&retrieved.citations),
        })
    }
}

/// Final answer with the legal basis it was drawn from.
#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub text: String,
    pub citations: Vec<String>,
}

impl Answer {
    pub fn insufficient() -> Self {
        Self {
            text: INSUFFICIENT_INFORMATION.to_string(),
            citations: Vec::new(),
        }
    }

    /// Whether the answer is the fixed insufficient-information sentinel.
    pub fn is_insufficient(&self) -> bool {
        self.text == INSUFFICIENT_INFORMATION && self.citations.is_empty()
    }
}

/// Retrieval plus generation under the evidence policy.
pub struct AnswerComposer {
    service: Arc<RetrievalService>,
    generator: Arc<dyn Generator>,
    policy: AnswerPolicy,
    retry: RetryPolicy,
}

impl AnswerComposer {
    pub fn new(
        service: Arc<RetrievalService>,
        generator: Arc<dyn Generator>,
        policy: AnswerPolicy,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            service,
            generator,
            policy,
            retry,
        }
    }

    pub async fn ask(&self, question: &str, k: usize) -> Result<Answer> {
        let retrieved = self.service.retrieve(question, k).await?;

        let retrieved = match self.policy.check(retrieved) {
            Evidence::Sufficient(retrieved) => retrieved,
            Evidence::Insufficient => {
                info!("Not enough legal context to answer; returning sentinel");
                return Ok(Answer::insufficient());
            }
        };

        let prompt = build_prompt(question, &retrieved.context);
        debug!("Prompt has {} characters", prompt.chars().count());

        let text = self
            .retry
            .run("generate", || self.generator.generate(SYSTEM_PROMPT, &prompt))
            .await?;

        let text = text.trim();
        let text = if text.is_empty() { NOT_FOUND } else { text };

        Ok(Answer {
            text: text.to_string(),
            citations: retrieved.citations,
        })
    }
}
