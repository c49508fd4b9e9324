//! Operator bot: routes inbound chat messages to the assembler and the
//! conversation machine, and answers through a [`Messenger`].

use std::sync::Arc;

use url::Url;

use crate::assemble::ListingAssembler;
use crate::config::IngestConfig;
use crate::conversation::{ConversationMachine, PendingField, Turn};
use crate::error::AppError;
use crate::models::{ChatId, InboundMessage, Listing, OperatorId};
use crate::traits::{AttributeExtractor, Fetcher, ListingStore, Messenger, ObjectStorage};

const GREETING_ADMIN: &str =
    "👋 Панель оператора.\n\n🔗 Пришлите ссылку на мотоцикл у поставщика, и я создам черновик объявления.";
const GREETING_VISITOR: &str =
    "🏍️ Это служебный бот каталога мотоциклов. Каталог доступен в мини-приложении.";
const HINT_ADMIN: &str = "🔗 Пришлите ссылку на страницу мотоцикла у поставщика.";
const HINT_VISITOR: &str = "📱 Каталог мотоциклов открывается кнопкой «Каталог».";
const NOT_VENDOR_URL: &str = "⚠️ Эта ссылка не с сайта поставщика. Пришлите ссылку на страницу мотоцикла.";
const PROCESSING: &str = "🔄 Загружаю страницу и фотографии...";
const CANCELLED: &str = "Ввод отменён. Черновик остался в каталоге со статусом draft.";
const NOTHING_TO_CANCEL: &str = "Сейчас нечего отменять.";
const SAVE_FAILED: &str = "❌ Не удалось сохранить ответ. Пришлите ссылку ещё раз, чтобы начать заново.";
const ASK_ARRIVAL_DATE: &str =
    "📅 Когда мотоцикл прибудет? Любой формат, например: «15 февраля» или «через неделю».";

/// Bot front end for one vendor catalog.
#[derive(Clone)]
pub struct IngestBot<X, G, F, L, M>
where
    X: AttributeExtractor,
    G: ObjectStorage,
    F: Fetcher,
    L: ListingStore,
    M: Messenger,
{
    assembler: ListingAssembler<X, G, F, L>,
    conversation: ConversationMachine<L>,
    messenger: M,
    config: Arc<IngestConfig>,
}

impl<X, G, F, L, M> IngestBot<X, G, F, L, M>
where
    X: AttributeExtractor,
    G: ObjectStorage,
    F: Fetcher,
    L: ListingStore,
    M: Messenger,
{
    pub fn new(
        assembler: ListingAssembler<X, G, F, L>,
        messenger: M,
        config: Arc<IngestConfig>,
    ) -> Self {
        let conversation = ConversationMachine::new(
            assembler.listings().store().clone(),
            config.max_arrival_date_len,
        );
        Self {
            assembler,
            conversation,
            messenger,
            config,
        }
    }

    pub fn conversation(&self) -> &ConversationMachine<L> {
        &self.conversation
    }

    /// Handle one inbound text message.
    pub async fn handle(&self, message: &InboundMessage) -> Result<(), AppError> {
        let operator = message.operator;
        let chat = message.chat;
        let text = message.text.trim();
        let is_admin = self.config.is_admin(operator);

        match text {
            "/start" => {
                let greeting = if is_admin { GREETING_ADMIN } else { GREETING_VISITOR };
                return self.say(chat, greeting).await;
            }
            "/cancel" => {
                let reply = match self.conversation.abandon(operator) {
                    Some(_) => CANCELLED,
                    None => NOTHING_TO_CANCEL,
                };
                return self.say(chat, reply).await;
            }
            _ => {}
        }

        if self.conversation.state(operator).is_some() {
            match self.conversation.handle_reply(operator, &message.text).await {
                Ok(Turn::NotConsumed) => {}
                Ok(turn) => return self.answer_turn(chat, turn).await,
                Err(e) => {
                    self.say(chat, SAVE_FAILED).await?;
                    return Err(e);
                }
            }
        }

        if !is_admin {
            return self.say(chat, HINT_VISITOR).await;
        }
        match Url::parse(text) {
            Ok(url) if self.config.is_vendor_url(&url) => self.ingest(operator, chat, text).await,
            Ok(url) if matches!(url.scheme(), "http" | "https") => {
                self.say(chat, NOT_VENDOR_URL).await
            }
            _ => self.say(chat, HINT_ADMIN).await,
        }
    }

    async fn ingest(&self, operator: OperatorId, chat: ChatId, url: &str) -> Result<(), AppError> {
        if let Some(pending) = self.conversation.state(operator) {
            return self.say(chat, &busy_text(pending.field)).await;
        }

        let progress = self.messenger.send_text(chat, PROCESSING).await?;
        let listing = match self.assembler.create_from_url(operator, url).await {
            Ok(listing) => listing,
            Err(e) => {
                tracing::error!(%operator, %url, error = %e, "Listing assembly failed");
                let text = format!("❌ Не удалось добавить мотоцикл: {e}");
                return self.messenger.edit_text(&progress, &text).await;
            }
        };

        if let Err(e) = self.conversation.begin(operator, listing.id) {
            tracing::warn!(%operator, listing_id = %listing.id, error = %e, "Draft created while another was pending");
            let text = format!(
                "⚠️ Черновик «{}» создан, но вы ещё заполняете другое объявление. Завершите его или отправьте /cancel.",
                listing.title
            );
            return self.messenger.edit_text(&progress, &text).await;
        }

        self.messenger
            .edit_text(&progress, &price_prompt(&listing))
            .await
    }

    async fn answer_turn(&self, chat: ChatId, turn: Turn) -> Result<(), AppError> {
        match turn {
            Turn::NotConsumed => Ok(()),
            Turn::Rejected { field, error } => {
                let text = match field {
                    PendingField::Price => format!("❌ {error}\n💰 Введите цену числом."),
                    PendingField::ArrivalDate => format!("❌ {error}\n{ASK_ARRIVAL_DATE}"),
                };
                self.say(chat, &text).await
            }
            Turn::PriceRecorded(_) => {
                self.say(chat, &format!("✅ Цена сохранена.\n\n{ASK_ARRIVAL_DATE}"))
                    .await
            }
            Turn::Published(listing) => self.say(chat, &publish_summary(&listing)).await,
        }
    }

    async fn say(&self, chat: ChatId, text: &str) -> Result<(), AppError> {
        self.messenger.send_text(chat, text).await.map(|_| ())
    }
}

fn busy_text(field: PendingField) -> String {
    let what = match field {
        PendingField::Price => "цену",
        PendingField::ArrivalDate => "дату прибытия",
    };
    format!("⏳ Сначала укажите {what} для предыдущего мотоцикла или отправьте /cancel.")
}

fn price_prompt(listing: &Listing) -> String {
    let title = if listing.title.is_empty() {
        "(название не распознано)"
    } else {
        listing.title.as_str()
    };
    format!(
        "✅ Черновик создан:\n🏍️ {title}\n📷 Фото: {}\n\n💰 Введите цену в {} (только число, например: 500000)",
        listing.photos.len(),
        listing.currency
    )
}

fn publish_summary(listing: &Listing) -> String {
    format!(
        "🎉 Мотоцикл опубликован!\n\n🏍️ {}\n💰 Цена: {} {}\n📅 Прибытие: {}\n📊 Статус: {}",
        listing.title,
        listing.price,
        listing.currency,
        listing.arrival_date().unwrap_or_default(),
        listing.status
    )
}
