fn main() -> anyhow::Result<()> {
    newsfeed_dl::run()
}
