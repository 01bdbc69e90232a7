mod record;

pub(crate) use self::record::RecordRow;
