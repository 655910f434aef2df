//! 选项与错误转换

use ::mongodb::error::{Error as MongoError, ErrorKind, WriteFailure};
use ::mongodb::options as mongo_options;
use bson::Document;

use crate::error::ProviderError;
use crate::types::*;

/// 把驱动错误转换为桥接层错误，错误码、错误码名称与标签原样保留
pub(crate) fn provider_error(err: MongoError) -> ProviderError {
    let labels: Vec<String> = err.labels().iter().cloned().collect();
    let (code, code_name, message) = match err.kind.as_ref() {
        ErrorKind::Command(command) => (Some(command.code), Some(command.code_name.clone()), command.message.clone()),
        ErrorKind::Write(WriteFailure::WriteError(write)) => (Some(write.code), write.code_name.clone(), write.message.clone()),
        ErrorKind::Write(WriteFailure::WriteConcernError(concern)) => {
            (Some(concern.code), Some(concern.code_name.clone()), concern.message.clone())
        }
        ErrorKind::BulkWrite(bulk) => match bulk.write_errors.as_ref().and_then(|errors| errors.first()) {
            Some(first) => (Some(first.code), first.code_name.clone(), first.message.clone()),
            None => (None, None, err.to_string()),
        },
        _ => (None, None, err.to_string()),
    };

    let mut provider = ProviderError::new(message).with_labels(labels);
    if let Some(code) = code {
        provider = provider.with_code(code);
    }
    if let Some(code_name) = code_name {
        provider = provider.with_code_name(code_name);
    }
    provider.with_source(err)
}

/// bson 反序列化错误
pub(crate) fn decode_error(err: impl std::error::Error + Send + Sync + 'static) -> ProviderError {
    ProviderError::new(err.to_string()).with_source(err)
}

fn collation(collation: &Option<Collation>) -> Option<mongo_options::Collation> {
    let collation = collation.as_ref()?;
    let strength = collation.strength.and_then(|strength| match strength {
        1 => Some(mongo_options::CollationStrength::Primary),
        2 => Some(mongo_options::CollationStrength::Secondary),
        3 => Some(mongo_options::CollationStrength::Tertiary),
        4 => Some(mongo_options::CollationStrength::Quaternary),
        5 => Some(mongo_options::CollationStrength::Identical),
        _ => None,
    });
    Some(
        mongo_options::Collation::builder()
            .locale(collation.locale.clone())
            .strength(strength)
            .build(),
    )
}

fn hint(hint: &Option<Hint>) -> Option<mongo_options::Hint> {
    hint.as_ref().map(|hint| match hint {
        Hint::Name(name) => mongo_options::Hint::Name(name.clone()),
        Hint::Keys(keys) => mongo_options::Hint::Keys(keys.clone()),
    })
}

fn read_concern(level: &ReadConcernLevel) -> mongo_options::ReadConcern {
    match level {
        ReadConcernLevel::Local => mongo_options::ReadConcern::local(),
        ReadConcernLevel::Majority => mongo_options::ReadConcern::majority(),
        ReadConcernLevel::Snapshot => mongo_options::ReadConcern::snapshot(),
        ReadConcernLevel::Custom(level) => mongo_options::ReadConcern::custom(level.clone()),
    }
}

fn write_concern(level: &WriteConcernLevel) -> mongo_options::WriteConcern {
    let acknowledgment = match level {
        WriteConcernLevel::Nodes(nodes) => mongo_options::Acknowledgment::Nodes(*nodes),
        WriteConcernLevel::Majority => mongo_options::Acknowledgment::Majority,
    };
    mongo_options::WriteConcern::builder().w(acknowledgment).build()
}

fn selection_criteria(preference: ReadPreference) -> mongo_options::SelectionCriteria {
    let options = mongo_options::ReadPreferenceOptions::default();
    let preference = match preference {
        ReadPreference::Primary => mongo_options::ReadPreference::Primary,
        ReadPreference::PrimaryPreferred => mongo_options::ReadPreference::PrimaryPreferred { options },
        ReadPreference::Secondary => mongo_options::ReadPreference::Secondary { options },
        ReadPreference::SecondaryPreferred => mongo_options::ReadPreference::SecondaryPreferred { options },
        ReadPreference::Nearest => mongo_options::ReadPreference::Nearest { options },
    };
    mongo_options::SelectionCriteria::ReadPreference(preference)
}

pub(crate) fn database_options(concern: &ConcernOptions) -> mongo_options::DatabaseOptions {
    let mut out = mongo_options::DatabaseOptions::default();
    out.selection_criteria = concern.read_preference.map(selection_criteria);
    out.read_concern = concern.read_concern.as_ref().map(read_concern);
    out.write_concern = concern.write_concern.as_ref().map(write_concern);
    out
}

pub(crate) fn collection_options(concern: &ConcernOptions) -> mongo_options::CollectionOptions {
    let mut out = mongo_options::CollectionOptions::default();
    out.selection_criteria = concern.read_preference.map(selection_criteria);
    out.read_concern = concern.read_concern.as_ref().map(read_concern);
    out.write_concern = concern.write_concern.as_ref().map(write_concern);
    out
}

pub(crate) fn find_options(options: &FindOptions) -> mongo_options::FindOptions {
    let mut out = mongo_options::FindOptions::default();
    out.sort = options.sort.clone();
    out.skip = options.skip;
    out.limit = options.limit;
    out.projection = options.projection.clone();
    out.batch_size = options.batch_size;
    out.cursor_type = Some(match options.cursor_type {
        CursorType::NonTailable => mongo_options::CursorType::NonTailable,
        CursorType::Tailable => mongo_options::CursorType::Tailable,
        CursorType::TailableAwait => mongo_options::CursorType::TailableAwait,
    });
    out.hint = hint(&options.hint);
    out.max_time = options.max_time;
    out.max_await_time = options.max_await_time;
    out.allow_disk_use = options.allow_disk_use;
    out.comment = options.comment.clone();
    out.collation = collation(&options.collation);
    out
}

pub(crate) fn find_one_options(options: &FindOptions) -> mongo_options::FindOneOptions {
    let mut out = mongo_options::FindOneOptions::default();
    out.sort = options.sort.clone();
    out.skip = options.skip;
    out.projection = options.projection.clone();
    out.hint = hint(&options.hint);
    out.max_time = options.max_time;
    out.comment = options.comment.clone();
    out.collation = collation(&options.collation);
    out
}

pub(crate) fn aggregate_options(options: &AggregateOptions) -> mongo_options::AggregateOptions {
    let mut out = mongo_options::AggregateOptions::default();
    out.batch_size = options.batch_size;
    out.allow_disk_use = options.allow_disk_use;
    out.max_time = options.max_time;
    out.collation = collation(&options.collation);
    out
}

pub(crate) fn update_options(options: &UpdateOptions) -> mongo_options::UpdateOptions {
    let mut out = mongo_options::UpdateOptions::default();
    out.upsert = Some(options.upsert);
    out
}

pub(crate) fn replace_options(options: &UpdateOptions) -> mongo_options::ReplaceOptions {
    let mut out = mongo_options::ReplaceOptions::default();
    out.upsert = Some(options.upsert);
    out
}

pub(crate) fn find_one_and_update_options(
    options: &FindOneAndUpdateOptions,
) -> mongo_options::FindOneAndUpdateOptions {
    let mut out = mongo_options::FindOneAndUpdateOptions::default();
    out.return_document = Some(match options.return_document {
        ReturnDocument::Before => mongo_options::ReturnDocument::Before,
        ReturnDocument::After => mongo_options::ReturnDocument::After,
    });
    out.upsert = Some(options.upsert);
    out.sort = options.sort.clone();
    out.projection = options.projection.clone();
    out
}

pub(crate) fn find_one_and_replace_options(
    options: &FindOneAndReplaceOptions,
) -> mongo_options::FindOneAndReplaceOptions {
    let mut out = mongo_options::FindOneAndReplaceOptions::default();
    out.return_document = Some(match options.return_document {
        ReturnDocument::Before => mongo_options::ReturnDocument::Before,
        ReturnDocument::After => mongo_options::ReturnDocument::After,
    });
    out.upsert = Some(options.upsert);
    out.sort = options.sort.clone();
    out.projection = options.projection.clone();
    out.hint = hint(&options.hint);
    out
}

pub(crate) fn index_model(keys: Document, options: &IndexOptions) -> ::mongodb::IndexModel {
    let mut index_options = mongo_options::IndexOptions::default();
    index_options.name = options.name.clone();
    index_options.unique = Some(options.unique);
    ::mongodb::IndexModel::builder()
        .keys(keys)
        .options(index_options)
        .build()
}

pub(crate) fn change_stream_options(
    options: &ChangeStreamOptions,
) -> Result<mongo_options::ChangeStreamOptions, ProviderError> {
    let mut out = mongo_options::ChangeStreamOptions::default();
    out.full_document = options.full_document.map(|mode| match mode {
        FullDocument::Default => mongo_options::FullDocumentType::Default,
        FullDocument::UpdateLookup => mongo_options::FullDocumentType::UpdateLookup,
        FullDocument::WhenAvailable => mongo_options::FullDocumentType::WhenAvailable,
        FullDocument::Required => mongo_options::FullDocumentType::Required,
    });
    out.resume_after = options.resume_after.as_ref().map(resume_token).transpose()?;
    out.start_after = options.start_after.as_ref().map(resume_token).transpose()?;
    out.max_await_time = options.max_await_time;
    out.start_at_operation_time = options.start_at_operation_time;
    out.batch_size = options.batch_size;
    out.collation = collation(&options.collation);
    Ok(out)
}

fn resume_token(token: &Document) -> Result<::mongodb::change_stream::event::ResumeToken, ProviderError> {
    bson::from_bson(bson::Bson::Document(token.clone())).map_err(decode_error)
}

pub(crate) fn transaction_options(options: &TransactionOptions) -> mongo_options::TransactionOptions {
    let mut out = mongo_options::TransactionOptions::default();
    out.read_concern = options.read_concern.as_ref().map(read_concern);
    out.write_concern = options.write_concern.as_ref().map(write_concern);
    out.max_commit_time = options.max_commit_time;
    out
}

pub(crate) fn session_options(options: &SessionOptions) -> mongo_options::SessionOptions {
    let mut out = mongo_options::SessionOptions::default();
    out.causal_consistency = options.causal_consistency;
    out.snapshot = options.snapshot;
    out.default_transaction_options = options.default_transaction_options.as_ref().map(transaction_options);
    out
}

/// 同步驱动在可追加游标上预读会一直阻塞，只接受普通游标
pub(crate) fn checked_find_options(options: &FindOptions) -> Result<mongo_options::FindOptions, ProviderError> {
    if options.cursor_type.is_tailable() {
        return Err(ProviderError::new("tailable cursors are not supported by the synchronous MongoDB driver"));
    }
    Ok(find_options(options))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_find_options_carry_modifiers() {
        let options = FindOptions {
            hint: Some(Hint::Name("a_1".to_string())),
            max_await_time: Some(Duration::from_millis(250)),
            allow_disk_use: Some(true),
            ..Default::default()
        };
        let out = find_options(&options);
        assert!(matches!(out.hint, Some(mongo_options::Hint::Name(ref name)) if name == "a_1"));
        assert_eq!(out.max_await_time, Some(Duration::from_millis(250)));
        assert_eq!(out.allow_disk_use, Some(true));
    }

    #[test]
    fn test_concern_options_map_to_collection_options() {
        let concern = ConcernOptions {
            read_preference: Some(ReadPreference::Secondary),
            read_concern: Some(ReadConcernLevel::Majority),
            write_concern: Some(WriteConcernLevel::Nodes(2)),
        };
        let out = collection_options(&concern);
        assert!(out.selection_criteria.is_some());
        assert_eq!(out.read_concern, Some(mongo_options::ReadConcern::majority()));
        assert_eq!(
            out.write_concern.and_then(|concern| concern.w),
            Some(mongo_options::Acknowledgment::Nodes(2))
        );
        assert!(database_options(&ConcernOptions::default()).write_concern.is_none());
    }

    #[test]
    fn test_tailable_find_is_rejected() {
        let tailable = FindOptions {
            cursor_type: CursorType::TailableAwait,
            ..Default::default()
        };
        assert!(checked_find_options(&tailable).is_err());
        assert!(checked_find_options(&FindOptions::default()).is_ok());
    }
}
